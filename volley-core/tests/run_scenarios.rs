use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use volley_core::{
    ArrivalModel, Error, OutcomeClass, RequestSpec, RunContext, RunState, ScenarioConfig, Stage,
    ThresholdSpec, run_scenario,
};
use volley_testserver::TestServer;

fn threshold(line: &str) -> ThresholdSpec {
    ThresholdSpec::parse_line(line).unwrap_or_else(|e| panic!("{e}"))
}

fn constant_vus(vus: u64, duration: Duration) -> ArrivalModel {
    ArrivalModel::ConstantVus { vus, duration }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limited_target_yields_only_client_errors() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "rate-limit",
        ArrivalModel::ConstantArrivalRate {
            rate: 5,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_secs(1),
            pre_allocated_vus: 1,
            max_vus: 1,
        },
        RequestSpec::get(server.urls().limited.clone()).expect_status([200, 429]),
    );
    config.thresholds.push(threshold("status in {200,429}"));
    config.thresholds.push(threshold("checks: rate==1"));

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    let s = &report.snapshot;
    assert_eq!(report.state, RunState::Completed);
    assert!(
        (4..=6).contains(&(s.iterations + s.dropped_iterations)),
        "iterations={} dropped={}",
        s.iterations,
        s.dropped_iterations
    );
    assert_eq!(s.classes.client_error_status, s.iterations);
    assert_eq!(s.status_codes.get(&429), Some(&s.iterations));
    assert!(report.thresholds_passed(), "{:?}", report.thresholds);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_target_fails_latency_threshold_with_observed_value() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "ramp",
        ArrivalModel::RampingVus {
            start_vus: 0,
            stages: vec![Stage {
                duration: Duration::from_millis(1_500),
                target: 4,
            }],
        },
        RequestSpec::get(server.urls().slow_ms(300)),
    );
    config.thresholds.push(threshold("p95_latency_ms < 200"));

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    assert!(report.snapshot.iterations > 0);
    assert!(report.pool.peak_active <= 4);

    let result = &report.thresholds[0];
    assert!(!result.passed);
    let observed = result.observed.unwrap_or_default();
    assert!(
        (295.0..500.0).contains(&observed),
        "observed p95 = {observed}"
    );
    assert!(!report.thresholds_passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_accepted_iteration_produces_exactly_one_outcome() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let config = ScenarioConfig::new(
        "saturated",
        ArrivalModel::ConstantArrivalRate {
            rate: 50,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_secs(1),
            pre_allocated_vus: 1,
            max_vus: 2,
        },
        RequestSpec::get(server.urls().slow_ms(60)),
    );

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let served = server.stats().requests_total();
    server.shutdown().await;

    let s = &report.snapshot;
    assert_eq!(
        s.iterations + s.interrupted_iterations,
        report.scheduler.dispatched
    );
    assert_eq!(report.scheduler.dispatched + report.scheduler.dropped, 50);
    assert_eq!(s.dropped_iterations, report.scheduler.dropped);
    assert!(s.dropped_iterations > 0, "2 VUs cannot sustain 50/s at 60ms");
    assert_eq!(served, s.iterations);
    assert!(report.pool.peak_active <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_run_never_reports_more_than_a_full_run() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "cancel",
        constant_vus(2, Duration::from_millis(1_200)),
        RequestSpec::get(server.urls().slow_ms(20)),
    );
    config.seed = 7;

    let full = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let ctx = RunContext::for_scenario(&config);
    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ctx.cancel("test");
        })
    };
    let partial = run_scenario(&config, ctx, None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let _ = canceller.await;
    server.shutdown().await;

    assert_eq!(full.state, RunState::Completed);
    assert_eq!(partial.state, RunState::Cancelled);
    assert_eq!(partial.cancel_reason.as_deref(), Some("test"));
    assert!(partial.snapshot.iterations > 0);
    assert!(partial.snapshot.iterations <= full.snapshot.iterations);
    assert!(partial.snapshot.latency.count <= full.snapshot.latency.count);
    assert!(partial.duration < full.duration);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consecutive_server_errors_trip_fail_fast() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "fail-fast",
        constant_vus(1, Duration::from_secs(10)),
        RequestSpec::get(server.urls().fail.clone()),
    );
    config.abort_on_consecutive_failures = Some(5);

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    assert_eq!(report.state, RunState::Cancelled);
    assert!(report.cancel_reason.is_some());
    assert!(report.snapshot.classes.server_error_status >= 5);
    assert!(report.duration < Duration::from_secs(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limiting_never_trips_fail_fast() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "quota",
        constant_vus(1, Duration::from_millis(300)),
        RequestSpec::get(server.urls().quota_per_minute(3)),
    );
    config.abort_on_consecutive_failures = Some(2);

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    let s = &report.snapshot;
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(s.classes.success_status, 3);
    assert_eq!(s.classes.client_error_status, s.iterations - 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_stop_interrupts_stragglers() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "stragglers",
        constant_vus(2, Duration::from_millis(200)),
        RequestSpec::get(server.urls().slow_ms(3_000)),
    );
    config.graceful_stop = Duration::from_millis(100);

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.snapshot.iterations, 0);
    assert_eq!(report.snapshot.interrupted_iterations, 2);
    assert!(report.duration < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_abandons_in_flight_iterations() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let config = ScenarioConfig::new(
        "abort",
        constant_vus(3, Duration::from_secs(10)),
        RequestSpec::get(server.urls().slow_ms(3_000)),
    );

    let ctx = RunContext::for_scenario(&config);
    let aborter = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ctx.abort("test abort");
        })
    };
    let report = run_scenario(&config, ctx.clone(), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let _ = aborter.await;

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.cancel_reason.as_deref(), Some("test abort"));
    assert!(report.duration < Duration::from_secs(2), "{:?}", report.duration);
    assert_eq!(report.snapshot.iterations, 0);
    assert_eq!(report.snapshot.interrupted_iterations, 3);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ctx.metrics().iterations_total(), 0);
    assert!(!ctx.abort("again"), "abort after a terminal state has no effect");
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ramping_arrival_rate_follows_the_integrated_rate() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let config = ScenarioConfig::new(
        "ramp-arrivals",
        ArrivalModel::RampingArrivalRate {
            start_rate: 0,
            time_unit: Duration::from_secs(1),
            stages: vec![Stage {
                duration: Duration::from_secs(2),
                target: 20,
            }],
            pre_allocated_vus: 5,
            max_vus: 10,
        },
        RequestSpec::get(server.urls().health.clone()),
    );

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    // 0 -> 20/s over 2s integrates to 20 arrivals; the one landing exactly at the end is excluded.
    let s = &report.snapshot;
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(s.dropped_iterations, 0);
    assert_eq!(report.scheduler.dispatched, s.iterations);
    assert!((18..=20).contains(&s.iterations), "iterations={}", s.iterations);

    // A quarter of the arrivals fall in the first second.
    let first_second = s.rate_series.first().map_or(0, |(_, n)| *n);
    assert!(first_second <= 7, "first second: {first_second}");
    assert!(first_second < s.iterations - first_second);
}

#[tokio::test]
async fn request_timeout_is_a_terminal_outcome() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let mut config = ScenarioConfig::new(
        "timeouts",
        constant_vus(1, Duration::from_millis(250)),
        RequestSpec::get(server.urls().slow_ms(1_000)),
    );
    config.request_timeout = Duration::from_millis(100);

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    let s = &report.snapshot;
    assert!(s.iterations >= 2);
    assert_eq!(s.classes.timeout, s.iterations);
    assert_eq!(s.classes.get(OutcomeClass::Timeout), s.iterations);
}

#[tokio::test]
async fn unreachable_target_is_a_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap_or_else(|e| panic!("bind: {e}"));
        listener
            .local_addr()
            .unwrap_or_else(|e| panic!("addr: {e}"))
            .port()
    };

    let config = ScenarioConfig::new(
        "refused",
        constant_vus(1, Duration::from_millis(100)),
        RequestSpec::get(format!("http://127.0.0.1:{port}/health")),
    );

    let report = run_scenario(&config, RunContext::for_scenario(&config), None)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let s = &report.snapshot;
    assert!(s.iterations > 0);
    assert_eq!(s.classes.network_error, s.iterations);
    assert!(s.status_codes.is_empty());
}

#[tokio::test]
async fn run_context_cannot_be_reused() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let config = ScenarioConfig::new(
        "once",
        constant_vus(1, Duration::from_millis(50)),
        RequestSpec::get(server.urls().health.clone()),
    );
    let ctx = RunContext::for_scenario(&config);

    let first = run_scenario(&config, ctx.clone(), None).await;
    let second = run_scenario(&config, ctx, None).await;
    server.shutdown().await;

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(Error::AlreadyStarted(RunState::Completed))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_is_reported_while_running() {
    let server = TestServer::start()
        .await
        .unwrap_or_else(|e| panic!("start test server: {e}"));

    let config = ScenarioConfig::new(
        "progress",
        constant_vus(1, Duration::from_millis(1_500)),
        RequestSpec::get(server.urls().slow_ms(10)),
    );

    let ticks = Arc::new(AtomicU64::new(0));
    let seen = ticks.clone();
    let progress: volley_core::ProgressFn = Arc::new(move |update: volley_core::ProgressUpdate| {
        assert!(update.pool.active <= 1);
        assert_eq!(update.total_duration, Duration::from_millis(1_500));
        seen.fetch_add(1, Ordering::Relaxed);
    });

    let report = run_scenario(&config, RunContext::for_scenario(&config), Some(progress))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    server.shutdown().await;

    assert!(report.snapshot.iterations > 0);
    assert!(ticks.load(Ordering::Relaxed) >= 1);
}
