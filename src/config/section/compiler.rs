//! `[compiler]` section configuration.
//!
//! Settings passed through to the external component compiler.
//!
//! # Example
//!
//! ```toml
//! [compiler]
//! dev = true      # Dev-mode compilation: richer diagnostics, no minification
//! ```

use serde::{Deserialize, Serialize};

/// Component compiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Compile components in dev mode. Dev mode keeps filename metadata
    /// and readable output; production mode minifies hydration scripts
    /// and extracted CSS.
    pub dev: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self { dev: true }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_compiler_config_default() {
        let config = test_parse_config("");
        assert!(config.compiler.dev);
    }

    #[test]
    fn test_compiler_config_production() {
        let config = test_parse_config("[compiler]\ndev = false");
        assert!(!config.compiler.dev);
    }
}
