//! Fixed-rate loop pacing.
//!
//! Each iteration is timed from its own start: when the work finishes early
//! the pacer sleeps off the rest of the period, when it overruns the next
//! iteration starts immediately. Lost time is never made up.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    iterations: u64,
    overruns: u64,
}

impl Pacer {
    /// `rate_hz` of 0 is treated as 1.
    pub fn new(rate_hz: u32) -> Self {
        Self::with_period(Duration::from_secs(1) / rate_hz.max(1))
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            iterations: 0,
            overruns: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep owed after a body that took `elapsed`.
    pub fn residual(&self, elapsed: Duration) -> Duration {
        self.period.saturating_sub(elapsed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Iterations whose body took the whole period or longer.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Run one iteration: await `work`, then sleep the residual.
    pub async fn tick<F: Future>(&mut self, work: F) -> F::Output {
        let start = Instant::now();
        let output = work.await;
        let elapsed = start.elapsed();
        self.iterations += 1;

        let residual = self.residual(elapsed);
        if residual.is_zero() {
            self.overruns += 1;
            tracing::debug!(
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                period_ms = self.period.as_secs_f64() * 1000.0,
                "loop overrun"
            );
        } else {
            tokio::time::sleep(residual).await;
        }
        output
    }
}
