use serde::{Deserialize, Serialize};

/// Search tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Page size when a request does not ask for one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound on any requested page size.
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Retry with fuzzy matching when an exact search finds nothing.
    #[serde(default = "default_fuzzy_fallback")]
    pub fuzzy_fallback: bool,
}

fn default_limit() -> usize {
    25
}

fn default_max_limit() -> usize {
    1000
}

fn default_fuzzy_fallback() -> bool {
    true
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            fuzzy_fallback: default_fuzzy_fallback(),
        }
    }
}

impl SearchSettings {
    #[must_use]
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    #[must_use]
    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    #[must_use]
    pub fn with_fuzzy_fallback(mut self, enabled: bool) -> Self {
        self.fuzzy_fallback = enabled;
        self
    }

    /// Effective page size for a requested limit.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: SearchSettings = toml::from_str("").unwrap();
        assert_eq!(settings.default_limit, 25);
        assert_eq!(settings.max_limit, 1000);
        assert!(settings.fuzzy_fallback);
    }

    #[test]
    fn test_page_size_is_capped() {
        let settings = SearchSettings::default()
            .with_default_limit(10)
            .with_max_limit(50);
        assert_eq!(settings.page_size(None), 10);
        assert_eq!(settings.page_size(Some(20)), 20);
        assert_eq!(settings.page_size(Some(500)), 50);
    }
}
