use anyhow::Context as _;
use volley_core::{RunConfig, ScenarioConfig};

use crate::cli::ValidateArgs;
use crate::run_error::RunError;
use crate::scenario_file::{build_doc_from_resolved_scenario, load_scenario_options};

/// Prints the resolved scenario (defaults filled in) as YAML.
pub async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let options = load_scenario_options(&args.scenario)
        .await
        .map_err(RunError::InvalidInput)?;
    let scenario = ScenarioConfig::from_options(options, RunConfig::default())
        .map_err(|e| RunError::InvalidInput(e.into()))?;

    let doc = build_doc_from_resolved_scenario(&scenario);
    let yaml = serde_yaml::to_string(&doc)
        .context("failed to serialize YAML")
        .map_err(RunError::RuntimeError)?;

    tracing::info!(scenario = %scenario.name, "scenario is valid");
    print!("{yaml}");
    Ok(())
}
