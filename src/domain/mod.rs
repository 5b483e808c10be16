pub mod catalog;
pub mod settings;
pub mod task;

pub use catalog::{dedup_entries, same_entry, CatalogEntry, RateTable};
pub use settings::{Settings, SettingsError};
pub use task::{Task, TaskId, TaskSlot, TaskSpec};
