//! Config - Quantization Configuration
//!
//! TOML-loadable settings for quantization and compilation.
//!
//! ```toml
//! n_bits = 8
//! is_signed = false
//! use_virtual_lib = true
//! max_bit_width = 8
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compile::CompileConfig;
use crate::error::{QuantError, QuantResult};
use crate::qparams::MAX_N_BITS;
use crate::MAXIMUM_BIT_WIDTH;

// =============================================================================
// Quantization Configuration
// =============================================================================

/// Quantization and compilation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantConfig {
    /// Bit width of quantized values
    #[serde(default = "default_n_bits")]
    pub n_bits: u32,

    /// Quantize graph inputs to a signed range
    #[serde(default)]
    pub is_signed: bool,

    /// Compile in simulation mode
    #[serde(default)]
    pub use_virtual_lib: bool,

    /// Bit-width ceiling of the target backend
    #[serde(default = "default_max_bit_width")]
    pub max_bit_width: u32,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            n_bits: default_n_bits(),
            is_signed: false,
            use_virtual_lib: false,
            max_bit_width: default_max_bit_width(),
        }
    }
}

fn default_n_bits() -> u32 {
    8
}
fn default_max_bit_width() -> u32 {
    MAXIMUM_BIT_WIDTH
}

impl QuantConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> QuantResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| QuantError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> QuantResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> QuantResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| QuantError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks that every setting is in range.
    pub fn validate(&self) -> QuantResult<()> {
        if self.n_bits == 0 || self.n_bits > MAX_N_BITS {
            return Err(QuantError::InvalidBitWidth {
                n_bits: self.n_bits,
                max: MAX_N_BITS,
            });
        }
        if self.max_bit_width == 0 {
            return Err(QuantError::Config("max_bit_width must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Compile settings derived from this configuration.
    pub fn compile_config(&self) -> CompileConfig {
        CompileConfig::new()
            .use_virtual_lib(self.use_virtual_lib)
            .max_bit_width(self.max_bit_width)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QuantConfig::from_toml_str("").unwrap();
        assert_eq!(config, QuantConfig::default());
        assert_eq!(config.n_bits, 8);
        assert_eq!(config.max_bit_width, MAXIMUM_BIT_WIDTH);
        assert_eq!(config.compile_config(), CompileConfig::default());
    }

    #[test]
    fn test_parse_and_compile_config() {
        let config = QuantConfig::from_toml_str(
            r#"
            n_bits = 6
            use_virtual_lib = true
            max_bit_width = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.n_bits, 6);
        assert!(!config.is_signed);
        let compile = config.compile_config();
        assert!(compile.use_virtual_lib);
        assert_eq!(compile.max_bit_width, 16);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            QuantConfig::from_toml_str("n_bits = 32"),
            Err(QuantError::InvalidBitWidth { n_bits: 32, .. })
        ));
        assert!(matches!(
            QuantConfig::from_toml_str("max_bit_width = 0"),
            Err(QuantError::Config(_))
        ));
        assert!(matches!(
            QuantConfig::from_toml_str("n_bits = \"eight\""),
            Err(QuantError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("cipherml-config-{}.toml", std::process::id()));
        let config = QuantConfig {
            n_bits: 4,
            is_signed: true,
            ..QuantConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = QuantConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            QuantConfig::load("/nonexistent/cipherml.toml"),
            Err(QuantError::Io(_))
        ));
    }
}
