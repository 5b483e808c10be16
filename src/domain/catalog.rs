//! Customer and project catalogs.
//!
//! An entry is a plain string, optionally suffixed with an hourly rate:
//! `"Acme"` or `"Acme,50"`. Two entries are the same catalog entry when
//! their parsed names match, regardless of rate suffix.

/// A parsed catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub rate: Option<f64>,
}

impl CatalogEntry {
    /// Parse a raw catalog string into name and optional hourly rate.
    ///
    /// The rate is taken from the text after the last comma when it parses
    /// as a non-negative decimal; otherwise the whole string is the name.
    pub fn parse(raw: &str) -> Self {
        if let Some((name, rate_str)) = raw.rsplit_once(',') {
            if let Ok(rate) = rate_str.trim().parse::<f64>() {
                if rate >= 0.0 && rate.is_finite() {
                    return Self {
                        name: name.trim().to_string(),
                        rate: Some(rate),
                    };
                }
            }
        }
        Self {
            name: raw.trim().to_string(),
            rate: None,
        }
    }
}

/// Whether two raw entries refer to the same catalog entry (name-only match).
pub fn same_entry(a: &str, b: &str) -> bool {
    CatalogEntry::parse(a).name == CatalogEntry::parse(b).name
}

/// De-duplicate raw entries by parsed name.
///
/// The first occurrence keeps its position; a later entry with the same name
/// replaces it in place, so re-adding `"Acme,50"` over `"Acme"` updates the
/// rate without creating a duplicate.
pub fn dedup_entries(entries: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in entries {
        if CatalogEntry::parse(raw).name.is_empty() {
            continue;
        }
        match out.iter().position(|existing| same_entry(existing, raw)) {
            Some(idx) => out[idx] = raw.clone(),
            None => out.push(raw.clone()),
        }
    }
    out
}

/// Hourly-rate lookup over the customer and project catalogs.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    customers: Vec<CatalogEntry>,
    projects: Vec<CatalogEntry>,
}

impl RateTable {
    pub fn new(customers: &[String], projects: &[String]) -> Self {
        Self {
            customers: customers.iter().map(|c| CatalogEntry::parse(c)).collect(),
            projects: projects.iter().map(|p| CatalogEntry::parse(p)).collect(),
        }
    }

    /// True when any catalog entry carries a rate.
    pub fn has_rates(&self) -> bool {
        self.customers
            .iter()
            .chain(self.projects.iter())
            .any(|e| e.rate.is_some())
    }

    /// Resolve the hourly rate for a task's labels.
    ///
    /// Customer rate wins over project rate when both are set.
    pub fn rate_for(&self, customer: &str, project: &str) -> Option<f64> {
        let lookup = |entries: &[CatalogEntry], label: &str| {
            entries
                .iter()
                .find(|e| e.name == label.trim())
                .and_then(|e| e.rate)
        };
        lookup(&self.customers, customer).or_else(|| lookup(&self.projects, project))
    }

    /// Projected revenue for a task: hours times rate, zero when not
    /// billable or no rate applies.
    pub fn projected_revenue(&self, customer: &str, project: &str, billable: bool, duration_ms: i64) -> f64 {
        if !billable {
            return 0.0;
        }
        match self.rate_for(customer, project) {
            Some(rate) => (duration_ms as f64 / 3_600_000.0) * rate,
            None => 0.0,
        }
    }
}
