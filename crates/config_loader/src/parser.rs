//! 配置格式
//!
//! TOML 为主，JSON 为辅；两种格式都能读写同一个 `PipelineBlueprint`。

use std::path::Path;

use contracts::{ContractError, PipelineBlueprint};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Format of a config file, by extension
    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse(format!(
                "cannot determine config format of {}",
                path.display()
            ))
        })?;
        Self::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }

    /// Deserialize only; cross-field checks live in the validator
    pub fn parse(self, content: &str) -> Result<PipelineBlueprint, ContractError> {
        let parsed = match self {
            Self::Toml => toml::from_str(content).map_err(boxed),
            Self::Json => serde_json::from_str(content).map_err(boxed),
        };
        parsed.map_err(|source| ContractError::ConfigParse {
            message: format!("{} parse error: {source}", self.label()),
            source: Some(source),
        })
    }

    pub fn render(self, blueprint: &PipelineBlueprint) -> Result<String, ContractError> {
        let rendered = match self {
            Self::Toml => toml::to_string_pretty(blueprint).map_err(boxed),
            Self::Json => serde_json::to_string_pretty(blueprint).map_err(boxed),
        };
        rendered.map_err(|source| ContractError::ConfigParse {
            message: format!("{} serialize error: {source}", self.label()),
            source: Some(source),
        })
    }
}

fn boxed<E>(e: E) -> Box<dyn std::error::Error + Send + Sync>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(e)
}
