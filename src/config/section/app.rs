//! `[app]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [app]
//! name = "My App"     # Document title fallback
//! ```

use serde::{Deserialize, Serialize};

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Application name, used as the document title when a controller
    /// supplies no `doc.title`.
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Lumo App".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_app_section() {
        let config = test_parse_config("[app]\nname = \"Demo\"");
        assert_eq!(config.app.name, "Demo");
    }

    #[test]
    fn test_app_section_default() {
        let config = test_parse_config("");
        assert_eq!(config.app.name, "Lumo App");
    }
}
