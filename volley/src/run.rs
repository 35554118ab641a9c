use std::sync::Arc;

use tokio::task::JoinHandle;
use volley_core::{RunConfig, RunContext, ScenarioConfig};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scenario_file::load_scenario_options;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let options = load_scenario_options(&args.scenario)
        .await
        .map_err(RunError::InvalidInput)?;
    let scenario = ScenarioConfig::from_options(options, run_config(&args))
        .map_err(|e| RunError::InvalidInput(e.into()))?;

    let ctx = RunContext::for_scenario(&scenario);
    let signals = spawn_signal_handler(ctx.clone());

    out.print_header(&args.scenario, &scenario);
    let result = volley_core::run_scenario(&scenario, ctx, out.progress()).await;
    signals.abort();

    let report = result?;
    out.print_summary(&report)
        .map_err(RunError::RuntimeError)?;

    let code = ExitCode::from_report(&report);
    tracing::debug!(code = code.as_i32(), state = %report.state, "exit");
    Ok(code)
}

fn run_config(args: &RunArgs) -> RunConfig {
    RunConfig {
        duration: args.duration,
        url: args.url.clone(),
        timeout: args.timeout,
    }
}

/// First Ctrl-C drains in-flight iterations; a second one stops without draining.
fn spawn_signal_handler(ctx: Arc<RunContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("interrupt received, stopping (press Ctrl-C again to abort in-flight requests)");
        ctx.cancel("interrupted");

        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("second interrupt, aborting in-flight iterations");
        ctx.abort("interrupted twice");
    })
}
