use serde::{Deserialize, Serialize};

use crate::error::{ChkError, ChkResult};
use crate::search_key::SearchKeyFormat;

/// Parameters for building a new map.
///
/// Maps opened from an existing root take their node size and key width
/// from the stored nodes; only the search key format and page cache size
/// apply to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChkMapConfig {
    /// Leaves split once their serialised form would exceed this many
    /// bytes. Zero disables splitting.
    pub maximum_size: usize,
    /// Number of components in every key.
    pub key_width: usize,
    pub search_key_format: SearchKeyFormat,
    /// Byte budget for cached serialised nodes.
    pub page_cache_bytes: usize,
}

impl Default for ChkMapConfig {
    fn default() -> Self {
        Self {
            maximum_size: 4096,
            key_width: 1,
            search_key_format: SearchKeyFormat::Plain,
            page_cache_bytes: 4 * 1024 * 1024,
        }
    }
}

impl ChkMapConfig {
    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> ChkResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| ChkError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChkResult<()> {
        if self.key_width == 0 {
            return Err(ChkError::InvalidConfig(
                "key_width must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
