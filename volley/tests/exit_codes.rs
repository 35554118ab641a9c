use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use volley_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn write_scenario(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

async fn volley(args: Vec<String>) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_volley");
    tokio::task::spawn_blocking(move || Command::new(exe).args(&args).output())
        .await
        .context("spawn_blocking join")?
        .context("run volley binary")
}

fn ensure_code(out: &Output, expected: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out.status) == expected,
        "expected exit code {expected}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

fn arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_volley");

    let out = Command::new(exe)
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--duration")
        .arg("10x")
        .output()
        .context("run volley binary")?;

    ensure_code(&out, 30)
}

#[tokio::test]
async fn missing_scenario_file_exit_30() -> anyhow::Result<()> {
    let out = volley(vec!["run".into(), "./no-such-scenario.yaml".into()]).await?;
    ensure_code(&out, 30)?;
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("no-such-scenario.yaml"),
        "stderr should name the file"
    );
    Ok(())
}

#[tokio::test]
async fn invalid_scenario_exit_30_before_any_request() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "bad.yaml",
        &format!(
            "executor: constant-arrival-rate\nrate: 10\nduration: 1s\npreAllocatedVUs: 5\nmaxVUs: 2\nurl: {}\n",
            server.urls().health
        ),
    )?;

    let out = volley(vec!["run".into(), arg(&path)]).await?;
    let requests = server.stats().requests_total();
    server.shutdown().await;

    ensure_code(&out, 30)?;
    anyhow::ensure!(
        String::from_utf8_lossy(&out.stderr).contains("maxVUs"),
        "stderr should explain the config error:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    anyhow::ensure!(requests == 0, "no request may be sent, got {requests}");
    Ok(())
}

#[tokio::test]
async fn unknown_threshold_metric_exit_30() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "bad_threshold.yaml",
        "url: http://127.0.0.1:9/\nvus: 1\nduration: 1s\nthresholds:\n  bogus_metric: <1\n",
    )?;

    let out = volley(vec!["run".into(), arg(&path)]).await?;
    ensure_code(&out, 30)
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "slow.yaml",
        &format!(
            r#"
name: slow
executor: constant-vus
vus: 2
duration: 500ms
url: {}
thresholds:
  p95_latency_ms: "<5"
"#,
            server.urls().slow_ms(50)
        ),
    )?;

    let out = volley(vec![
        "run".into(),
        arg(&path),
        "--output".into(),
        "json".into(),
    ])
    .await?;
    server.shutdown().await;

    ensure_code(&out, 11)
}

#[tokio::test]
async fn passing_run_exit_0_with_json_summary() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "limited.json",
        &format!(
            r#"{{
  "name": "limited",
  "executor": "constant-arrival-rate",
  "rate": 10,
  "duration": "1s",
  "preAllocatedVUs": 2,
  "maxVUs": 4,
  "request": {{ "url": "{}", "expectStatus": [200, 429] }},
  "thresholds": ["status in {{200,429}}", "checks: rate==1"]
}}"#,
            server.urls().limited
        ),
    )?;

    let out = volley(vec![
        "run".into(),
        arg(&path),
        "--output".into(),
        "json".into(),
    ])
    .await?;
    server.shutdown().await;

    ensure_code(&out, 0)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    let summary = stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|v| v.get("kind").and_then(|k| k.as_str()) == Some("summary"))
        .context("summary line missing")?;

    let iterations = summary
        .get("iterations")
        .and_then(serde_json::Value::as_u64)
        .context("iterations")?;
    let limited = summary
        .pointer("/status_codes/429")
        .and_then(serde_json::Value::as_u64)
        .context("429 count")?;
    anyhow::ensure!(iterations > 0, "expected iterations, got {summary}");
    anyhow::ensure!(iterations == limited, "every response should be 429: {summary}");
    anyhow::ensure!(
        summary.get("state").and_then(|s| s.as_str()) == Some("completed"),
        "unexpected state: {summary}"
    );
    Ok(())
}

#[tokio::test]
async fn url_override_targets_other_endpoint() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "override.yaml",
        "vus: 1\nduration: 5s\nurl: http://127.0.0.1:9/unreachable\nthresholds:\n  http_req_failed: rate==0\n",
    )?;

    let out = volley(vec![
        "run".into(),
        arg(&path),
        "--url".into(),
        server.urls().health.clone(),
        "--duration".into(),
        "300ms".into(),
        "--output".into(),
        "json".into(),
    ])
    .await?;
    let requests = server.stats().requests_total();
    server.shutdown().await;

    ensure_code(&out, 0)?;
    anyhow::ensure!(requests > 0, "override url was not used");
    Ok(())
}

#[tokio::test]
async fn fail_fast_cancels_with_exit_13() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "fail.yaml",
        &format!(
            "vus: 1\nduration: 30s\nabortOnConsecutiveFailures: 3\nurl: {}\n",
            server.urls().fail
        ),
    )?;

    let started = std::time::Instant::now();
    let out = volley(vec![
        "run".into(),
        arg(&path),
        "--output".into(),
        "json".into(),
    ])
    .await?;
    server.shutdown().await;

    ensure_code(&out, 13)?;
    anyhow::ensure!(
        started.elapsed() < std::time::Duration::from_secs(20),
        "fail-fast should stop the run early"
    );
    Ok(())
}

#[tokio::test]
async fn validate_prints_resolved_scenario() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "ramp.yaml",
        "stages:\n  - duration: 2s\n    target: 4\nurl: http://127.0.0.1:9/health\n",
    )?;

    let out = volley(vec!["validate".into(), arg(&path)]).await?;
    ensure_code(&out, 0)?;

    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("name: ramp"), "stdout:\n{stdout}");
    anyhow::ensure!(stdout.contains("executor: ramping-vus"), "stdout:\n{stdout}");
    anyhow::ensure!(stdout.contains("startVUs: 0"), "stdout:\n{stdout}");
    anyhow::ensure!(stdout.contains("gracefulStop: 30s"), "stdout:\n{stdout}");
    Ok(())
}

#[tokio::test]
async fn validate_rejects_invalid_scenario() -> anyhow::Result<()> {
    let dir = tempfile::tempdir().context("tempdir")?;
    let path = write_scenario(
        dir.path(),
        "bad.yaml",
        "executor: warp-speed\nurl: http://127.0.0.1:9/health\n",
    )?;

    let out = volley(vec!["validate".into(), arg(&path)]).await?;
    ensure_code(&out, 30)
}
