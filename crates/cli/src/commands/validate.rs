//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{DumpPolicyKind, ManagerKind, PipelineBlueprint};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    manager: String,
    timeline_count: usize,
    producer_count: usize,
    input_count: usize,
    output: String,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    manager: format!("{:?}", blueprint.memory.manager),
                    timeline_count: blueprint.timelines.len(),
                    producer_count: blueprint.producers.len(),
                    input_count: blueprint.sync.inputs.len(),
                    output: blueprint.sync.output.clone(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    for input in &blueprint.sync.inputs {
        if !blueprint.producers.iter().any(|p| &p.timeline == input) {
            warnings.push(format!(
                "Input '{input}' has no producer - it stays empty and every cycle is skipped"
            ));
        }
    }

    let memory = &blueprint.memory;
    if memory.manager == ManagerKind::Null && memory.dump_policy != DumpPolicyKind::Never {
        warnings.push("memory.dump_policy is ignored by the null manager".to_string());
    }
    if memory.manager == ManagerKind::Null && memory.spill_dir.is_some() {
        warnings.push("memory.spill_dir is ignored by the null manager".to_string());
    }

    let defined = blueprint.timelines.len();
    let used = blueprint.sync.inputs.len() + 1;
    if defined > used {
        warnings.push(format!(
            "{} timeline(s) are not part of the sync topology",
            defined - used
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Manager: {}", summary.manager);
            println!("  Timelines: {}", summary.timeline_count);
            println!("  Producers: {}", summary.producer_count);
            println!("  Sync: {} input(s) -> {}", summary.input_count, summary.output);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
