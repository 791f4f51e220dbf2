//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (`validator` derive)
//! - timeline 名称唯一，描述符合法
//! - sync 的输入/输出存在，输入之间容量与描述符一致，输出可容纳输入
//! - 每个 producer 指向一个 sync 输入，负载类型与 element_size 兼容
//! - delays 仅引用输入且非负
//! - 融合策略与 element_size 兼容

use std::collections::HashSet;

use contracts::{
    ContractError, FusionKind, PipelineBlueprint, ProducerKind, TimelineConfig,
};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

const MATRIX_BYTES: usize = 64;

/// 校验 PipelineBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_timelines(blueprint)?;
    validate_sync_topology(blueprint)?;
    validate_producers(blueprint)?;
    validate_delays(blueprint)?;
    validate_fusion(blueprint)?;
    Ok(())
}

/// 字段级范围校验
fn validate_fields(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let Err(errors) = blueprint.validate() else {
        return Ok(());
    };

    let mut flat = Vec::new();
    flatten("", &errors, &mut flat);
    flat.sort();

    let count = flat.len();
    let Some((field, message)) = flat.into_iter().next() else {
        return Err(ContractError::config_validation("<root>", errors.to_string()));
    };
    let message = if count > 1 {
        format!("{message} (+{} more)", count - 1)
    } else {
        message
    };
    Err(ContractError::config_validation(field, message))
}

fn flatten(prefix: &str, errors: &ValidationErrors, out: &mut Vec<(String, String)>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed '{}' check", error.code));
                    out.push((path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    flatten(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

/// 校验 timeline 名称唯一与描述符
fn validate_timelines(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, timeline) in blueprint.timelines.iter().enumerate() {
        if !seen.insert(timeline.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("timelines[name={}]", timeline.name),
                "duplicate timeline name",
            ));
        }
        timeline.descriptor().map_err(|e| {
            ContractError::config_validation(format!("timelines[{idx}]"), e.to_string())
        })?;
    }
    Ok(())
}

fn find<'a>(
    blueprint: &'a PipelineBlueprint,
    field: &str,
    name: &str,
) -> Result<&'a TimelineConfig, ContractError> {
    blueprint.timeline(name).ok_or_else(|| {
        ContractError::config_validation(field, format!("timeline '{name}' is not defined"))
    })
}

/// 校验 sync 输入/输出拓扑
fn validate_sync_topology(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let sync = &blueprint.sync;

    let mut seen = HashSet::new();
    let mut inputs = Vec::with_capacity(sync.inputs.len());
    for name in &sync.inputs {
        if !seen.insert(name.as_str()) {
            return Err(ContractError::config_validation(
                "sync.inputs",
                format!("timeline '{name}' listed twice"),
            ));
        }
        inputs.push(find(blueprint, "sync.inputs", name)?);
    }

    if seen.contains(sync.output.as_str()) {
        return Err(ContractError::config_validation(
            "sync.output",
            format!("output '{}' is also an input", sync.output),
        ));
    }
    let output = find(blueprint, "sync.output", &sync.output)?;

    let Some(first) = inputs.first() else {
        return Ok(());
    };
    for input in &inputs[1..] {
        if input.capacity != first.capacity
            || input.element_size != first.element_size
            || input.max_elements != first.max_elements
        {
            return Err(ContractError::timeline_mismatch(
                input.name.as_str(),
                format!(
                    "capacity {} / layout {}x{} differs from '{}' ({} / {}x{})",
                    input.capacity,
                    input.max_elements,
                    input.element_size,
                    first.name,
                    first.capacity,
                    first.max_elements,
                    first.element_size
                ),
            ));
        }
    }

    if output.element_size != first.element_size || output.max_elements < first.max_elements {
        return Err(ContractError::timeline_mismatch(
            output.name.as_str(),
            format!(
                "output layout {}x{} cannot hold inputs of {}x{}",
                output.max_elements, output.element_size, first.max_elements, first.element_size
            ),
        ));
    }
    Ok(())
}

/// 校验 producer 目标与负载类型
fn validate_producers(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, producer) in blueprint.producers.iter().enumerate() {
        let field = format!("producers[{idx}].timeline");
        if !blueprint.sync.inputs.contains(&producer.timeline) {
            return Err(ContractError::config_validation(
                field,
                format!("'{}' is not a sync input", producer.timeline),
            ));
        }
        if !seen.insert(producer.timeline.as_str()) {
            return Err(ContractError::config_validation(
                field,
                format!("'{}' already has a producer", producer.timeline),
            ));
        }

        let timeline = find(blueprint, &field, &producer.timeline)?;
        let fits = match producer.kind {
            ProducerKind::Markers => timeline.element_size % 4 == 0,
            ProducerKind::Matrices => timeline.element_size == MATRIX_BYTES,
        };
        if !fits {
            return Err(ContractError::config_validation(
                format!("producers[{idx}].kind"),
                format!(
                    "{:?} samples do not fit element_size {} of '{}'",
                    producer.kind, timeline.element_size, timeline.name
                ),
            ));
        }
    }
    Ok(())
}

/// 校验各输入延迟
fn validate_delays(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    for (name, delay) in &blueprint.sync.delays_ms {
        let field = format!("sync.delays_ms.{name}");
        if !blueprint.sync.inputs.contains(name) {
            return Err(ContractError::config_validation(
                field,
                format!("'{name}' is not a sync input"),
            ));
        }
        if !delay.is_finite() || *delay < 0.0 {
            return Err(ContractError::config_validation(
                field,
                format!("delay must be a non-negative number, got {delay}"),
            ));
        }
    }
    Ok(())
}

/// 校验融合策略与元素大小
fn validate_fusion(blueprint: &PipelineBlueprint) -> Result<(), ContractError> {
    let Some(input) = blueprint
        .sync
        .inputs
        .first()
        .and_then(|name| blueprint.timeline(name))
    else {
        return Ok(());
    };

    let element_size = input.element_size;
    let message = match blueprint.sync.fusion {
        FusionKind::First => None,
        FusionKind::MeanF32 if element_size % 4 != 0 => Some(format!(
            "mean_f32 needs an element_size divisible by 4, got {element_size}"
        )),
        FusionKind::RigidTransform if element_size != MATRIX_BYTES => Some(format!(
            "rigid_transform needs element_size {MATRIX_BYTES}, got {element_size}"
        )),
        _ => None,
    };
    match message {
        Some(message) => Err(ContractError::config_validation("sync.fusion", message)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        ConfigVersion, MemoryConfig, OverflowPolicy, ProducerConfig, SyncConfig,
    };
    use std::collections::HashMap;

    fn timeline(name: &str, element_size: usize, max_elements: usize) -> TimelineConfig {
        TimelineConfig {
            name: name.into(),
            capacity: 16,
            element_size,
            max_elements,
            overflow: OverflowPolicy::Grow,
        }
    }

    fn minimal_blueprint() -> PipelineBlueprint {
        PipelineBlueprint {
            version: ConfigVersion::V1,
            memory: MemoryConfig::default(),
            timelines: vec![
                timeline("camera", 64, 4),
                timeline("tracker", 64, 4),
                timeline("fused", 64, 4),
            ],
            producers: vec![ProducerConfig {
                timeline: "camera".into(),
                kind: ProducerKind::Matrices,
                frequency_hz: 30.0,
                start_ms: 0.0,
                occlusion_period: None,
            }],
            sync: SyncConfig {
                inputs: vec!["camera".into(), "tracker".into()],
                output: "fused".into(),
                fusion: FusionKind::RigidTransform,
                tolerance_ms: None,
                framerate_hz: None,
                delays_ms: HashMap::new(),
            },
        }
    }

    fn error_of(bp: &PipelineBlueprint) -> String {
        validate(bp).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_config() {
        let bp = minimal_blueprint();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_field_range() {
        let mut bp = minimal_blueprint();
        bp.timelines[1].max_elements = 65;
        let err = error_of(&bp);
        assert!(err.contains("timelines[1].max_elements"), "got: {err}");

        let mut bp = minimal_blueprint();
        bp.producers[0].frequency_hz = 0.0;
        let err = error_of(&bp);
        assert!(err.contains("producers[0].frequency_hz"), "got: {err}");
    }

    #[test]
    fn test_duplicate_timeline() {
        let mut bp = minimal_blueprint();
        bp.timelines.push(timeline("camera", 64, 4));
        let err = error_of(&bp);
        assert!(err.contains("duplicate timeline name"), "got: {err}");
    }

    #[test]
    fn test_unknown_sync_timeline() {
        let mut bp = minimal_blueprint();
        bp.sync.inputs.push("lidar".into());
        let err = error_of(&bp);
        assert!(err.contains("'lidar' is not defined"), "got: {err}");

        let mut bp = minimal_blueprint();
        bp.sync.output = "nowhere".into();
        assert!(error_of(&bp).contains("not defined"));

        let mut bp = minimal_blueprint();
        bp.sync.output = "camera".into();
        assert!(error_of(&bp).contains("also an input"));
    }

    #[test]
    fn test_input_mismatch() {
        let mut bp = minimal_blueprint();
        bp.timelines[1].capacity = 32;
        let err = validate(&bp).unwrap_err();
        assert!(matches!(err, ContractError::TimelineMismatch { .. }));

        let mut bp = minimal_blueprint();
        bp.timelines[2].max_elements = 2;
        let err = validate(&bp).unwrap_err();
        assert!(err.to_string().contains("cannot hold"), "got: {err}");
    }

    #[test]
    fn test_producer_rules() {
        let mut bp = minimal_blueprint();
        bp.producers[0].timeline = "fused".into();
        assert!(error_of(&bp).contains("not a sync input"));

        let mut bp = minimal_blueprint();
        bp.producers.push(bp.producers[0].clone());
        assert!(error_of(&bp).contains("already has a producer"));

        let mut bp = minimal_blueprint();
        for t in &mut bp.timelines {
            t.element_size = 12;
        }
        bp.sync.fusion = FusionKind::MeanF32;
        let err = error_of(&bp);
        assert!(err.contains("do not fit element_size 12"), "got: {err}");
    }

    #[test]
    fn test_delays() {
        let mut bp = minimal_blueprint();
        bp.sync.delays_ms.insert("tracker".into(), 15.0);
        assert!(validate(&bp).is_ok());

        bp.sync.delays_ms.insert("fused".into(), 5.0);
        assert!(error_of(&bp).contains("sync.delays_ms.fused"));

        let mut bp = minimal_blueprint();
        bp.sync.delays_ms.insert("camera".into(), -1.0);
        assert!(error_of(&bp).contains("non-negative"));
    }

    #[test]
    fn test_fusion_element_size() {
        let mut bp = minimal_blueprint();
        bp.producers.clear();
        for t in &mut bp.timelines {
            t.element_size = 12;
        }
        let err = error_of(&bp);
        assert!(err.contains("rigid_transform"), "got: {err}");

        bp.sync.fusion = FusionKind::MeanF32;
        assert!(validate(&bp).is_ok());
    }
}
