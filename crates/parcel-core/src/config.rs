use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ParcelError, ParcelResult};

/// Top-level configuration (loaded from parcel.toml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParcelConfig {
    pub log: LogConfig,
    pub pipeline: PipelineConfig,
    pub keys: KeyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// When decrypted plaintext may leave the decrypting filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleasePolicy {
    /// Forward plaintext as soon as it is decrypted. Only the bytes that may
    /// still be the tag are held back, so downstream consumers can observe
    /// data before `close()` has verified it.
    #[default]
    Streaming,
    /// Hold all plaintext until the tag verifies at `close()`. Memory grows
    /// with the stream length.
    Authenticated,
}

/// Decryption pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Plaintext release policy of the decrypting filter (default: streaming)
    pub release_policy: ReleasePolicy,
    /// Upper bound on encrypted attachment bytes per message, tag included
    /// (None = unlimited)
    pub max_attachments_bytes: Option<u64>,
    /// Attachment blobs are gzipped under the encryption (default: false)
    pub gzip: bool,
    /// Read buffer size used when feeding files into a pipeline (default: 64 KiB)
    pub io_buffer_size: usize,
}

/// Sizes of generated and derived keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Login key length in bits (default: 512)
    pub login_key_bits: usize,
    /// Private-data key length in bits (default: 256)
    pub private_data_key_bits: usize,
    /// Per-message key length in bits (default: 256)
    pub message_key_bits: usize,
    /// Length of randomly generated IVs in bytes (default: 12)
    pub random_iv_bytes: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            release_policy: ReleasePolicy::Streaming,
            max_attachments_bytes: None,
            gzip: false,
            io_buffer_size: 64 * 1024,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            login_key_bits: 512,
            private_data_key_bits: 256,
            message_key_bits: 256,
            random_iv_bytes: 12,
        }
    }
}

impl ParcelConfig {
    /// Load the config at `path`, falling back to defaults if the file is absent.
    pub fn load(path: &Path) -> ParcelResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| ParcelError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> ParcelResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ParcelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ParcelResult<String> {
        toml::to_string_pretty(self).map_err(|e| ParcelError::Config(e.to_string()))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ParcelResult<()> {
        for (name, bits) in [
            ("login_key_bits", self.keys.login_key_bits),
            ("private_data_key_bits", self.keys.private_data_key_bits),
            ("message_key_bits", self.keys.message_key_bits),
        ] {
            if bits < 128 || bits % 8 != 0 {
                return Err(ParcelError::Config(format!(
                    "keys.{name} must be a multiple of 8 and at least 128, got {bits}"
                )));
            }
        }
        if self.keys.random_iv_bytes == 0 {
            return Err(ParcelError::Config("keys.random_iv_bytes must be non-zero".into()));
        }
        if self.pipeline.io_buffer_size == 0 {
            return Err(ParcelError::Config("pipeline.io_buffer_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[pipeline]
release_policy = "authenticated"
max_attachments_bytes = 104857600
gzip = true
io_buffer_size = 4096

[keys]
login_key_bits = 512
private_data_key_bits = 256
message_key_bits = 256
random_iv_bytes = 16
"#;
        let config = ParcelConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.pipeline.release_policy, ReleasePolicy::Authenticated);
        assert_eq!(config.pipeline.max_attachments_bytes, Some(104_857_600));
        assert!(config.pipeline.gzip);
        assert_eq!(config.pipeline.io_buffer_size, 4096);
        assert_eq!(config.keys.random_iv_bytes, 16);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ParcelConfig::from_toml_str("").unwrap();
        assert_eq!(config, ParcelConfig::default());
        assert_eq!(config.pipeline.release_policy, ReleasePolicy::Streaming);
        assert!(!config.pipeline.gzip);
        assert_eq!(config.keys.login_key_bits, 512);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ParcelConfig::from_toml_str("[pipeline]\nio_buffer_size = 128\n").unwrap();
        assert_eq!(config.pipeline.io_buffer_size, 128);
        assert_eq!(config.pipeline.release_policy, ReleasePolicy::Streaming);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_rejects_odd_key_size() {
        let err = ParcelConfig::from_toml_str("[keys]\nmessage_key_bits = 250\n").unwrap_err();
        assert!(matches!(err, ParcelError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_release_policy() {
        let err =
            ParcelConfig::from_toml_str("[pipeline]\nrelease_policy = \"eager\"\n").unwrap_err();
        assert!(matches!(err, ParcelError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ParcelConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ParcelConfig::default());
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parcel.toml");
        let mut config = ParcelConfig::default();
        config.pipeline.max_attachments_bytes = Some(10);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = ParcelConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
