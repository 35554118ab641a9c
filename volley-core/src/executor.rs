use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use volley_metrics::{Outcome, OutcomeClass};

use crate::config::{RequestSpec, ThinkTime};
use crate::context::OutcomeSink;
use crate::http::{self, HttpClient, HttpResponse};

#[derive(Debug, Clone, Copy)]
pub struct IterationMeta {
    pub seq: u64,
    pub vu: u64,
    pub run_started: Instant,
}

/// Performs one request per iteration and reports exactly one [`Outcome`] for it.
#[derive(Debug)]
pub struct RequestExecutor {
    client: HttpClient,
    think_time: ThinkTime,
    rng: Mutex<StdRng>,
}

impl RequestExecutor {
    pub fn new(client: HttpClient, think_time: ThinkTime, seed: u64) -> Self {
        Self {
            client,
            think_time,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Runs the request, emits its outcome to `sink`, then applies think time.
    ///
    /// Transport failures and timeouts become classified outcomes; nothing here fails the run.
    pub async fn execute(
        &self,
        req: &RequestSpec,
        timeout: Duration,
        meta: IterationMeta,
        sink: &dyn OutcomeSink,
    ) -> Outcome {
        let started = Instant::now();
        let started_at = started.saturating_duration_since(meta.run_started);

        let res = self.client.request(req, timeout).await;
        let latency = started.elapsed();

        let outcome = classify(req, res, meta, started_at, latency);
        sink.emit(outcome.clone());

        let pause = self.next_think_time();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        outcome
    }

    fn next_think_time(&self) -> Duration {
        if self.think_time.is_none() {
            return Duration::ZERO;
        }
        self.think_time.sample(&mut *self.rng.lock())
    }
}

fn classify(
    req: &RequestSpec,
    res: http::Result<HttpResponse>,
    meta: IterationMeta,
    started_at: Duration,
    latency: Duration,
) -> Outcome {
    let outcome = match res {
        Ok(resp) => Outcome::response(meta.seq, meta.vu, resp.status, started_at, latency)
            .with_bytes_received(resp.bytes_received),
        Err(err) => {
            let class = if err.is_timeout() {
                OutcomeClass::Timeout
            } else {
                OutcomeClass::NetworkError
            };
            tracing::trace!(seq = meta.seq, vu = meta.vu, error = %err, "request failed");
            Outcome::failure(
                meta.seq,
                meta.vu,
                class,
                err.transport_error_kind().to_string(),
                started_at,
                latency,
            )
        }
    };

    if req.expect_status.is_empty() {
        return outcome;
    }
    let passed = outcome
        .status
        .is_some_and(|s| req.expect_status.contains(&s));
    outcome.with_check(passed)
}
