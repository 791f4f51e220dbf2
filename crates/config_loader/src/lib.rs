//! # Config Loader
//!
//! 读取管道配置 (`PipelineBlueprint`)：解析、命令行覆盖、校验。
//!
//! 文件格式由扩展名决定 (`.toml` / `.json`)。任何来源的配置都要经过同一套
//! 校验后才会交给调用方，覆盖项也不例外。
//!
//! ```no_run
//! use config_loader::{ConfigLoader, ConfigOverrides};
//! use std::path::Path;
//!
//! let overrides = ConfigOverrides { framerate_hz: Some(60.0), ..Default::default() };
//! let blueprint = ConfigLoader::load_with_overrides(Path::new("pipeline.toml"), &overrides)?;
//! println!("timelines: {}", blueprint.timelines.len());
//! # Ok::<(), contracts::ContractError>(())
//! ```

mod parser;
mod validator;

pub use contracts::PipelineBlueprint;
pub use parser::ConfigFormat;
pub use validator::validate;

use contracts::ContractError;
use std::path::{Path, PathBuf};

/// Values that replace file settings after parsing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Sync timer rate; `0` switches to syncing on every push
    pub framerate_hz: Option<f64>,
    pub spill_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.framerate_hz.is_none() && self.spill_dir.is_none()
    }

    fn apply(&self, blueprint: &mut PipelineBlueprint) {
        if let Some(hz) = self.framerate_hz {
            blueprint.sync.framerate_hz = (hz > 0.0).then_some(hz);
        }
        if let Some(dir) = &self.spill_dir {
            blueprint.memory.spill_dir = Some(dir.clone());
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Read, parse and validate a config file
    pub fn load_from_path(path: &Path) -> Result<PipelineBlueprint, ContractError> {
        Self::load_with_overrides(path, &ConfigOverrides::default())
    }

    /// Like [`load_from_path`](Self::load_from_path), with `overrides` applied
    /// before validation
    pub fn load_with_overrides(
        path: &Path,
        overrides: &ConfigOverrides,
    ) -> Result<PipelineBlueprint, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        let mut blueprint = format.parse(&content)?;
        overrides.apply(&mut blueprint);
        validate(&blueprint)?;
        Ok(blueprint)
    }

    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<PipelineBlueprint, ContractError> {
        let blueprint = format.parse(content)?;
        validate(&blueprint)?;
        Ok(blueprint)
    }

    /// Apply `overrides` to an already loaded blueprint and re-check it
    pub fn apply_overrides(
        mut blueprint: PipelineBlueprint,
        overrides: &ConfigOverrides,
    ) -> Result<PipelineBlueprint, ContractError> {
        if overrides.is_empty() {
            return Ok(blueprint);
        }
        overrides.apply(&mut blueprint);
        validate(&blueprint)?;
        Ok(blueprint)
    }

    pub fn to_toml(blueprint: &PipelineBlueprint) -> Result<String, ContractError> {
        ConfigFormat::Toml.render(blueprint)
    }

    pub fn to_json(blueprint: &PipelineBlueprint) -> Result<String, ContractError> {
        ConfigFormat::Json.render(blueprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FusionKind, ManagerKind};
    use std::io::Write;

    const MINIMAL_TOML: &str = r#"
[memory]
manager = "spill"
dump_policy = "barrier"
barrier_bytes = 8192

[[timelines]]
name = "camera"
capacity = 32
element_size = 64
max_elements = 2

[[timelines]]
name = "tracker"
capacity = 32
element_size = 64
max_elements = 2

[[timelines]]
name = "fused"
capacity = 32
element_size = 64
max_elements = 2

[[producers]]
timeline = "camera"
kind = "matrices"
frequency_hz = 30.0

[[producers]]
timeline = "tracker"
kind = "matrices"
frequency_hz = 100.0
occlusion_period = 5

[sync]
inputs = ["camera", "tracker"]
output = "fused"
fusion = "rigid_transform"
tolerance_ms = 20.0

[sync.delays_ms]
tracker = 5.0
"#;

    #[test]
    fn test_load_from_str_toml() {
        let result = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let bp = result.unwrap();
        assert_eq!(bp.memory.manager, ManagerKind::Spill);
        assert_eq!(bp.timelines.len(), 3);
        assert_eq!(bp.producers[1].occlusion_period, Some(5));
        assert_eq!(bp.sync.fusion, FusionKind::RigidTransform);
        assert_eq!(bp.sync.delays_ms["tracker"], 5.0);
    }

    #[test]
    fn test_round_trip_toml() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let serialized = ConfigLoader::to_toml(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&serialized, ConfigFormat::Toml).unwrap();
        assert_eq!(bp.timelines.len(), bp2.timelines.len());
        assert_eq!(bp.timelines[0].name, bp2.timelines[0].name);
        assert_eq!(bp.sync.inputs, bp2.sync.inputs);
        assert_eq!(bp.memory.barrier_bytes, bp2.memory.barrier_bytes);
    }

    #[test]
    fn test_round_trip_json() {
        let bp = ConfigLoader::load_from_str(MINIMAL_TOML, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&bp).unwrap();
        let bp2 = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();
        assert_eq!(bp.sync.output, bp2.sync.output);
        assert_eq!(bp.sync.tolerance_ms, bp2.sync.tolerance_ms);
    }

    #[test]
    fn test_validation_runs_after_parse() {
        // parses fine, but the output is also listed as an input
        let content = MINIMAL_TOML.replace(
            r#"inputs = ["camera", "tracker"]"#,
            r#"inputs = ["camera", "tracker", "fused"]"#,
        );
        let err = ConfigLoader::load_from_str(&content, ConfigFormat::Toml).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("also an input"), "got: {err}");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();

        let bp = ConfigLoader::load_from_path(file.path()).unwrap();
        assert_eq!(bp.sync.output, "fused");

        let err = ConfigLoader::load_from_path(Path::new("pipeline.yaml")).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn test_overrides_applied_before_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(MINIMAL_TOML.as_bytes()).unwrap();

        let overrides = ConfigOverrides {
            framerate_hz: Some(60.0),
            spill_dir: Some(PathBuf::from("/tmp/tlsync-spill")),
        };
        let bp = ConfigLoader::load_with_overrides(file.path(), &overrides).unwrap();
        assert_eq!(bp.sync.framerate_hz, Some(60.0));
        assert_eq!(bp.memory.spill_dir, Some(PathBuf::from("/tmp/tlsync-spill")));

        // out of range for the timer
        let too_fast = ConfigOverrides {
            framerate_hz: Some(5000.0),
            ..Default::default()
        };
        let err = ConfigLoader::load_with_overrides(file.path(), &too_fast).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_zero_framerate_means_event_driven() {
        let bp = ConfigLoader::load_from_str(
            &MINIMAL_TOML.replace("tolerance_ms = 20.0", "tolerance_ms = 20.0\nframerate_hz = 30.0"),
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(bp.sync.framerate_hz, Some(30.0));

        let overrides = ConfigOverrides {
            framerate_hz: Some(0.0),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
        let bp = ConfigLoader::apply_overrides(bp, &overrides).unwrap();
        assert_eq!(bp.sync.framerate_hz, None);
        assert!(ConfigOverrides::default().is_empty());
    }
}
