use std::time::Duration;

use anyhow::bail;

#[derive(Debug, Clone)]
pub struct ReqrepConfig {
    /// A request that was not answered for this long is resent. This is also the minimum
    ///  interval between two sweeps, regardless of how often the heartbeat ticks.
    pub retry_interval: Duration,

    /// Replies are kept for this long after they were last sent (or requested again) to
    ///  answer duplicate requests. Must be a lot longer than the requesters' retry interval
    ///  times their retry budget, otherwise late duplicates cause the handler to be invoked again.
    pub reply_retention: Duration,

    /// number of resends before a request times out
    pub retry_budget: u32,

    /// tick interval for [crate::reqrep::manager::run_reqrep_driver] - irrelevant if the
    ///  host application drives the heartbeat
    pub heartbeat_interval: Duration,
}

impl Default for ReqrepConfig {
    fn default() -> Self {
        ReqrepConfig {
            retry_interval: Duration::from_secs(5),
            reply_retention: Duration::from_secs(50),
            retry_budget: 6,
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

impl ReqrepConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_interval.is_zero() {
            bail!("retry interval must be positive");
        }
        if self.reply_retention <= self.retry_interval {
            bail!("reply retention ({:?}) must be longer than the retry interval ({:?})", self.reply_retention, self.retry_interval);
        }
        if self.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::default(ReqrepConfig::default(), true)]
    #[case::zero_retry(ReqrepConfig { retry_interval: Duration::ZERO, ..Default::default() }, false)]
    #[case::short_retention(ReqrepConfig { reply_retention: Duration::from_secs(5), ..Default::default() }, false)]
    #[case::zero_heartbeat(ReqrepConfig { heartbeat_interval: Duration::ZERO, ..Default::default() }, false)]
    #[case::no_retries(ReqrepConfig { retry_budget: 0, ..Default::default() }, true)]
    fn test_validate(#[case] config: ReqrepConfig, #[case] valid: bool) {
        assert_eq!(config.validate().is_ok(), valid);
    }
}
