use serde::Deserialize;

use crate::error::{CodecError, Result};

/// Codec-wide defaults. Every key is optional in TOML.
///
/// ```toml
/// block_size = 8192
/// default_int_divider = 1
/// default_float_multiplier = 1.0
/// max_header_depth = 32
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CodecConfig {
    /// Capacity of one block buffer in bytes, header included.
    pub block_size: usize,
    /// Divider given to new integer delta fields.
    pub default_int_divider: u64,
    /// Multiplier given to new floating delta fields.
    pub default_float_multiplier: f64,
    /// Deepest composite nesting accepted when reloading a header.
    pub max_header_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            block_size: 4096,
            default_int_divider: 1,
            default_float_multiplier: 1.0,
            max_header_depth: 32,
        }
    }
}

impl CodecConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: CodecConfig = toml::from_str(source)?;
        config.validate()?;
        tracing::debug!("CodecConfig loaded: block_size={}", config.block_size);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size < 8 {
            return Err(CodecError::out_of_range("block_size", "must be at least 8 bytes"));
        }
        if self.default_int_divider == 0 {
            return Err(CodecError::out_of_range("default_int_divider", "must be positive"));
        }
        if !(self.default_float_multiplier.is_finite() && self.default_float_multiplier > 0.0) {
            return Err(CodecError::out_of_range(
                "default_float_multiplier",
                "must be finite and positive",
            ));
        }
        if self.max_header_depth == 0 {
            return Err(CodecError::out_of_range("max_header_depth", "must be positive"));
        }
        Ok(())
    }
}
