//! Codec configuration with sensible defaults.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Default maximum frame size: 16 MiB (§4.1).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum decompression expansion ratio (§4.1, zip-bomb guard).
pub const DEFAULT_MAX_DECOMPRESSION_RATIO: u32 = 100;

/// Tunable limits for the wire codec (§4.1).
///
/// # Examples
///
/// ```rust
/// use playhouse_proto::config::{CodecConfig, DEFAULT_MAX_FRAME_SIZE};
///
/// let config = CodecConfig::default();
/// assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
///
/// let config = CodecConfig::builder()
///     .with_max_frame_size(1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_frame_size, 1024 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Maximum total frame size, length prefix included.
    pub max_frame_size: usize,

    /// Maximum allowed ratio of decompressed to compressed payload size.
    pub max_decompression_ratio: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_decompression_ratio: DEFAULT_MAX_DECOMPRESSION_RATIO,
        }
    }
}

impl CodecConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CodecConfigBuilder {
        CodecConfigBuilder::default()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0".to_string());
        }
        if self.max_frame_size < 9 {
            return Err("max_frame_size must be large enough for a header".to_string());
        }
        if self.max_decompression_ratio == 0 {
            return Err("max_decompression_ratio must be > 0".to_string());
        }
        Ok(())
    }
}

/// Builder for [`CodecConfig`] with a fluent API.
#[derive(Debug, Default)]
pub struct CodecConfigBuilder {
    config: CodecConfig,
}

impl CodecConfigBuilder {
    /// Set the maximum total frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum decompression expansion ratio.
    pub fn with_max_decompression_ratio(mut self, ratio: u32) -> Self {
        self.config.max_decompression_ratio = ratio;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<CodecConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CodecConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = CodecConfig::builder()
            .with_max_frame_size(2048)
            .with_max_decompression_ratio(10)
            .build()
            .expect("valid config");
        assert_eq!(config.max_frame_size, 2048);
        assert_eq!(config.max_decompression_ratio, 10);
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        let err = CodecConfig::builder()
            .with_max_frame_size(0)
            .build()
            .unwrap_err();
        assert!(err.contains("max_frame_size"));
    }

    #[test]
    fn zero_decompression_ratio_is_rejected() {
        let err = CodecConfig::builder()
            .with_max_decompression_ratio(0)
            .build()
            .unwrap_err();
        assert!(err.contains("max_decompression_ratio"));
    }
}
