use std::future::Future;
use std::time::Duration;

use common::config::MIN_SETTLE_DELAY;
use common::{Config, Error, GatewayError, GatewayResult, Result};

/// Time budgets for one engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineTiming {
    /// Upper bound on any single exchange call. Elapsing counts as transient.
    pub gateway_timeout: Duration,
    /// Pause between the close and the open of a flip. Never below 2s.
    pub settle_delay: Duration,
    /// Interval between "is it flat yet?" polls after the pause.
    pub settle_poll: Duration,
    /// Give up on the paired open if the close has not settled by then.
    pub settle_timeout: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
            settle_delay: MIN_SETTLE_DELAY,
            settle_poll: Duration::from_secs(1),
            settle_timeout: Duration::from_secs(15),
        }
    }
}

impl EngineTiming {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            gateway_timeout: cfg.gateway_timeout,
            settle_delay: cfg.settle_delay.max(MIN_SETTLE_DELAY),
            settle_timeout: cfg.settle_timeout,
            ..Self::default()
        }
    }
}

/// Run one gateway call under a deadline.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: &'static str,
    fut: impl Future<Output = GatewayResult<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(GatewayError::transient(format!("{call} timed out after {limit:?}")).into()),
    }
}
