use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User configuration persisted alongside the task history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub default_customer: String,
    pub default_project: String,
    pub default_billable: bool,
    pub webhook_url: String,
    pub webhook_enabled: bool,
    pub currency: String,
    pub currency_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_customer: String::new(),
            default_project: String::new(),
            default_billable: false,
            webhook_url: String::new(),
            webhook_enabled: false,
            currency: "USD".to_string(),
            currency_format: "{symbol}{amount}".to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("a webhook URL is required when webhook delivery is enabled")]
    MissingWebhookUrl,
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.webhook_enabled && self.webhook_url.trim().is_empty() {
            return Err(SettingsError::MissingWebhookUrl);
        }
        Ok(())
    }

    /// Whether completed tasks should be delivered to the webhook.
    pub fn webhook_active(&self) -> bool {
        self.webhook_enabled && !self.webhook_url.trim().is_empty()
    }
}
