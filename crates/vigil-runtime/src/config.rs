#![forbid(unsafe_code)]

//! Scope tree configuration.
//!
//! Defaults match the classic digest loop: at most ten dirty passes per
//! digest. With the `config-file` feature, configuration can be loaded from
//! TOML or JSON:
//!
//! ```toml
//! digest_ttl = 20
//! ```

use crate::error::ConfigError;

/// Default bound on dirty passes per digest.
pub const DEFAULT_DIGEST_TTL: usize = 10;

/// Per-tree settings, fixed when the root scope is built.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "config-file",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ScopeConfig {
    /// Unstable passes allowed before a digest aborts with
    /// [`ScopeError::InfiniteDigest`](crate::ScopeError::InfiniteDigest).
    pub digest_ttl: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            digest_ttl: DEFAULT_DIGEST_TTL,
        }
    }
}

impl ScopeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_digest_ttl(mut self, ttl: usize) -> Self {
        self.digest_ttl = ttl;
        self
    }

    /// Check the settings are usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroDigestTtl`] when `digest_ttl` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.digest_ttl == 0 {
            return Err(ConfigError::ZeroDigestTtl);
        }
        Ok(())
    }

    /// Parse and validate TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] when the text is not valid TOML for this type.
    /// - [`ConfigError::ZeroDigestTtl`] when `digest_ttl` is zero.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Parse`] when the text is not valid JSON for this type.
    /// - [`ConfigError::ZeroDigestTtl`] when `digest_ttl` is zero.
    #[cfg(feature = "config-file")]
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, choosing the format by extension (`.json`, otherwise TOML).
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Io`] when the file cannot be read.
    /// - [`ConfigError::Parse`] when its contents do not parse.
    /// - [`ConfigError::ZeroDigestTtl`] when `digest_ttl` is zero.
    #[cfg(feature = "config-file")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_ten() {
        assert_eq!(ScopeConfig::default().digest_ttl, 10);
        assert!(ScopeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = ScopeConfig::new().with_digest_ttl(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroDigestTtl));
    }
}
