//! # Scene Configuration
//!
//! Loaded once at startup, usually from a TOML file:
//!
//! ```toml
//! thread_name = "render-world"
//! stack_size = 4194304
//! setup_timeout_ms = 2000
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::{SceneError, SceneResult};

/// Configuration for a world's worker threads and setup phase.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SceneConfig {
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
    /// Worker stack size in bytes; platform default if unset.
    pub stack_size: Option<usize>,
    /// Give up on setup after this long. Waits forever if unset.
    pub setup_timeout_ms: Option<u64>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            thread_name: "subsystem".to_string(),
            stack_size: None,
            setup_timeout_ms: None,
        }
    }
}

impl SceneConfig {
    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the text is not valid TOML, has unknown
    /// keys, or names an empty thread prefix.
    pub fn from_toml_str(text: &str) -> SceneResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SceneError::InvalidConfig(e.to_string()))?;
        if config.thread_name.is_empty() {
            return Err(SceneError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(config)
    }

    /// The setup timeout as a `Duration`.
    #[must_use]
    pub fn setup_timeout(&self) -> Option<Duration> {
        self.setup_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(SceneConfig::from_toml_str("").unwrap(), SceneConfig::default());
    }

    #[test]
    fn test_parse_all_keys() {
        let config = SceneConfig::from_toml_str(
            r#"
            thread_name = "ui"
            stack_size = 65536
            setup_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.thread_name, "ui");
        assert_eq!(config.stack_size, Some(65536));
        assert_eq!(config.setup_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_unknown_and_empty() {
        assert!(matches!(
            SceneConfig::from_toml_str("workers = 4"),
            Err(SceneError::InvalidConfig(_))
        ));
        assert!(matches!(
            SceneConfig::from_toml_str("thread_name = \"\""),
            Err(SceneError::InvalidConfig(_))
        ));
    }
}
