use crate::error::{self, Result};
use crate::settings::Settings;
use log::{debug, trace};
use snafu::ensure;
use std::future::Future;
use std::time::Duration;

/// How often, and how many times, to check whether something became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    attempts: u32,
    interval: Duration,
}

impl Poll {
    pub fn new(attempts: u32, interval: Duration) -> Result<Self> {
        ensure!(attempts > 0, error::InvalidPollSnafu);
        Ok(Self { attempts, interval })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.poll_attempts,
            Duration::from_millis(settings.poll_interval_ms),
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time the poll may sleep, not counting the probes themselves.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }

    /// Runs `probe` until it returns `Ok(true)`. A probe error counts as "not ready yet".
    pub async fn until<F, Fut>(&self, what: &str, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.until_some(what, || {
            let fut = probe();
            async move { fut.await.map(|ready| ready.then(|| ())) }
        })
        .await
    }

    /// Runs `probe` until it produces a value.
    pub async fn until_some<T, F, Fut>(&self, what: &str, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for attempt in 1..=self.attempts {
            match probe().await {
                Ok(Some(value)) => {
                    debug!("{} ready after {} attempt(s)", what, attempt);
                    return Ok(value);
                }
                Ok(None) => trace!("{} not ready ({}/{})", what, attempt, self.attempts),
                Err(e) => debug!(
                    "{} not ready ({}/{}): {}",
                    what, attempt, self.attempts, e
                ),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.interval).await;
            }
        }
        error::TimeoutSnafu {
            what,
            attempts: self.attempts,
        }
        .fail()
    }
}
