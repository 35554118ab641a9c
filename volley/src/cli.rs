use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

const DURATION_HINT: &str = "expected e.g. 10s, 250ms, 1m30s";

/// Accepts humantime strings (`1m30s`, `250ms`) and bare integers (seconds).
fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err(format!("duration cannot be empty ({DURATION_HINT})"));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return positive(Duration::from_secs(secs), s);
    }

    let d = humantime::parse_duration(s)
        .map_err(|_| format!("invalid duration '{s}' ({DURATION_HINT})"))?;
    positive(d, s)
}

fn positive(d: Duration, raw: &str) -> Result<Duration, String> {
    if d.is_zero() {
        return Err(format!("duration '{raw}' must be greater than zero"));
    }
    Ok(d)
}

fn parse_url(input: &str) -> Result<String, String> {
    let s = input.trim();
    if s.starts_with("http://") || s.starts_with("https://") {
        Ok(s.to_string())
    } else {
        Err(format!("invalid url '{s}' (expected http:// or https://)"))
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Live progress bar and a human-readable report.
    HumanReadable,
    /// Emit JSON progress lines and a final summary line (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "volley",
    author,
    version,
    about = "Scenario-driven HTTP load generator",
    long_about = "volley drives HTTP traffic at a target according to a scenario document (YAML or JSON).\n\nOpen-loop models (`constant-arrival-rate`, `ramping-arrival-rate`) start iterations on a fixed schedule regardless of completions; closed-loop models (`constant-vus`, `ramping-vus`) keep a number of virtual users busy.\n\nThresholds declared in the scenario decide the exit code.",
    after_help = "Examples:\n  volley run scenarios/rate_limit.yaml\n  volley run scenarios/rate_limit.yaml --duration 30s --output json\n  volley run scenarios/ramp.yaml --url http://127.0.0.1:8080/health\n  volley validate scenarios/ramp.yaml\n\nLogging: set VOLLEY_LOG (e.g. VOLLEY_LOG=debug) or pass -v/-vv."
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). Overrides VOLLEY_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load scenario
    #[command(
        long_about = "Run a scenario document against its target and print a report.\n\nCLI flags override values from the document."
    )]
    Run(RunArgs),

    /// Parse and validate a scenario document, then print the resolved scenario
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario document (.yaml, .yml or .json)
    pub scenario: PathBuf,

    /// Override the duration of a constant model (e.g. 10s, 250ms, 1m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Override the url of every request in the scenario
    #[arg(long, value_parser = parse_url)]
    pub url: Option<String>,

    /// Override the per-request timeout
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the scenario document (.yaml, .yml or .json)
    pub scenario: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_common_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(2 * 60 * 60)));
        assert_eq!(parse_duration("15"), Ok(Duration::from_secs(15)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("0").is_err());
    }

    #[test]
    fn parse_url_requires_http_scheme() {
        assert!(parse_url("http://127.0.0.1:8080/health").is_ok());
        assert!(parse_url("https://example.com").is_ok());
        assert!(parse_url("ftp://example.com").is_err());
        assert!(parse_url("example.com").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "volley",
            "-vv",
            "run",
            "scenario.yaml",
            "--duration",
            "250ms",
            "--url",
            "http://127.0.0.1:9/health",
            "--timeout",
            "2s",
            "--output",
            "json",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scenario, PathBuf::from("scenario.yaml"));
                assert_eq!(args.duration, Some(Duration::from_millis(250)));
                assert_eq!(args.url.as_deref(), Some("http://127.0.0.1:9/health"));
                assert_eq!(args.timeout, Some(Duration::from_secs(2)));
                assert!(matches!(args.output, OutputFormat::Json));
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_run_defaults() {
        let cli = match Cli::try_parse_from(["volley", "run", "s.json"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        assert_eq!(cli.verbose, 0);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.duration, None);
                assert_eq!(args.url, None);
                assert_eq!(args.timeout, None);
                assert!(matches!(args.output, OutputFormat::HumanReadable));
            }
            Command::Validate(_) => panic!("expected run command"),
        }
    }

    #[test]
    fn cli_parses_validate() {
        let cli = match Cli::try_parse_from(["volley", "validate", "s.yaml", "-v"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Validate(args) => assert_eq!(args.scenario, PathBuf::from("s.yaml")),
            Command::Run(_) => panic!("expected validate command"),
        }
    }

    #[test]
    fn cli_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["volley", "run", "s.yaml", "--duration", "10x"]).is_err());
    }
}
