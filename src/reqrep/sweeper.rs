use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::overlay::packet::Packet;
use crate::reqrep::frame::FrameKind;
use crate::reqrep::reply_cache::ReplyCache;
use crate::reqrep::reqrep_config::ReqrepConfig;
use crate::reqrep::request_table::{RequestRecord, RequestTable};

/// Side effects of a sweep. They are collected while the manager's lock is held and executed
///  after it is released.
#[derive(Default)]
pub struct SweepOutcome {
    pub resends: Vec<Packet>,
    /// [FrameKind::Request] records that used up their retry budget and are removed from the
    ///  table. Lossy requests are dropped without showing up here.
    pub timed_out: Vec<RequestRecord>,
    pub num_evicted_replies: usize,
}

/// Resends unanswered requests, expires requests that used up their retry budget, and evicts
///  old replies.
///
/// The sweeper is passive: it is triggered by a heartbeat and only does actual work if at
///  least a retry interval passed since the previous sweep, regardless of the heartbeat's
///  frequency.
pub struct Sweeper {
    config: Arc<ReqrepConfig>,
    last_sweep: Instant,
}

impl Sweeper {
    pub fn new(config: Arc<ReqrepConfig>, now: Instant) -> Sweeper {
        Sweeper {
            config,
            last_sweep: now,
        }
    }

    /// Returns `None` if the sweep was throttled.
    pub fn sweep(&mut self, now: Instant, requests: &mut RequestTable, replies: &mut ReplyCache) -> Option<SweepOutcome> {
        if now.duration_since(self.last_sweep) <= self.config.retry_interval {
            trace!("sweep throttled");
            return None;
        }
        self.last_sweep = now;

        let mut outcome = SweepOutcome::default();
        let mut expired = Vec::new();

        for record in requests.records_mut() {
            if now.duration_since(record.last_sent_at) <= self.config.retry_interval {
                continue;
            }

            if record.remaining_retries == 0 {
                expired.push(record.id);
                continue;
            }

            record.remaining_retries -= 1;
            if record.kind == FrameKind::Request {
                record.send_count += 1;
                record.last_sent_at = now;
                trace!(id = ?record.id, send_count = record.send_count, "resending request");
                outcome.resends.push(record.packet.clone());
            }
        }

        for id in expired {
            if let Some(record) = requests.remove(id) {
                if record.kind == FrameKind::Request {
                    debug!(?id, destination = ?record.destination, send_count = record.send_count, "request timed out");
                    outcome.timed_out.push(record);
                }
                else {
                    trace!(?id, "lossy request expired");
                }
            }
        }

        outcome.num_evicted_replies = replies.evict_expired(now, self.config.reply_retention);

        Some(outcome)
    }
}
