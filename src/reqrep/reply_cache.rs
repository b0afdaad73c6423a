use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::overlay::address::Address;
use crate::overlay::packet::Packet;
use crate::reqrep::frame::RequestId;

/// Server side processing state of a received request
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReplyState {
    /// the handler was invoked and did not answer yet
    InFlight,
    /// the reply packet, ready to be resent for duplicates
    Answered(Packet),
    /// a lossy request that the handler chose not to answer
    Declined,
    /// There was no handler, or it failed. This holds the error packet if one was sent.
    Failed(Option<Packet>),
}

#[derive(Debug)]
pub struct ReplyRecord {
    pub request: Packet,
    pub state: ReplyState,
    pub last_answered_at: Instant,
}

/// Requests this node received recently, keyed by request id *and* requester since request
///  ids are chosen by requesters independently.
///
/// Records are created when a request is first seen and are removed only when they expire:
///  duplicates of a request may keep arriving after it was answered.
#[derive(Default)]
pub struct ReplyCache {
    records: FxHashMap<(RequestId, Address), ReplyRecord>,
}

impl ReplyCache {
    /// Looks up a request that was seen before, marking it as recently used.
    pub fn touch(&mut self, id: RequestId, requester: Address, now: Instant) -> Option<&ReplyRecord> {
        let record = self.records.get_mut(&(id, requester))?;
        record.last_answered_at = now;
        Some(record)
    }

    pub fn insert_in_flight(&mut self, id: RequestId, requester: Address, request: Packet, now: Instant) {
        self.records.insert((id, requester), ReplyRecord {
            request,
            state: ReplyState::InFlight,
            last_answered_at: now,
        });
    }

    /// Stores the outcome of a request. The record is re-created if it expired while the
    ///  handler was busy.
    pub fn complete(&mut self, id: RequestId, requester: Address, request: &Packet, state: ReplyState, now: Instant) {
        let record = self.records.entry((id, requester))
            .or_insert_with(|| ReplyRecord {
                request: request.clone(),
                state: ReplyState::InFlight,
                last_answered_at: now,
            });
        record.state = state;
        record.last_answered_at = now;
    }

    /// Marks an in-flight request as failed, returning `false` if the request was answered
    ///  in the meantime.
    pub fn fail(&mut self, id: RequestId, requester: Address, error: Option<Packet>) -> bool {
        match self.records.get_mut(&(id, requester)) {
            Some(record) if record.state == ReplyState::InFlight => {
                record.state = ReplyState::Failed(error);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// removes records that were not used for longer than `retention`, returning the number
    ///  of removed records
    pub fn evict_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let len_before = self.records.len();
        self.records.retain(|(id, requester), record| {
            let keep = now.duration_since(record.last_answered_at) <= retention;
            if !keep {
                debug!(?id, ?requester, "evicting cached reply");
            }
            keep
        });
        len_before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
impl ReplyCache {
    pub fn get(&self, id: RequestId, requester: Address) -> Option<&ReplyRecord> {
        self.records.get(&(id, requester))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::time;

    use crate::overlay::packet::RoutingMode;
    use crate::reqrep::manager::REQREP_PROTOCOL_ID;

    use super::*;

    fn packet(from: u64, to: u64, payload: &'static [u8]) -> Packet {
        Packet {
            source: Address::from_u64(from),
            destination: Address::from_u64(to),
            ttl: 3,
            routing: RoutingMode::Exact,
            protocol: REQREP_PROTOCOL_ID,
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_includes_requester() {
        let mut cache = ReplyCache::default();
        cache.insert_in_flight(RequestId(1), Address::from_u64(10), packet(10, 1, b"a"), Instant::now());

        assert!(cache.touch(RequestId(1), Address::from_u64(10), Instant::now()).is_some());
        assert!(cache.touch(RequestId(1), Address::from_u64(11), Instant::now()).is_none());
        assert!(cache.touch(RequestId(2), Address::from_u64(10), Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_existing() {
        let mut cache = ReplyCache::default();
        let request = packet(10, 1, b"req");
        cache.insert_in_flight(RequestId(1), Address::from_u64(10), request.clone(), Instant::now());

        time::advance(Duration::from_secs(3)).await;
        let reply = packet(1, 10, b"rep");
        cache.complete(RequestId(1), Address::from_u64(10), &request, ReplyState::Answered(reply.clone()), Instant::now());

        let record = cache.get(RequestId(1), Address::from_u64(10)).unwrap();
        assert_eq!(record.state, ReplyState::Answered(reply));
        assert_eq!(record.last_answered_at, Instant::now());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_reinserts_evicted() {
        let mut cache = ReplyCache::default();
        let request = packet(10, 1, b"req");

        cache.complete(RequestId(1), Address::from_u64(10), &request, ReplyState::Declined, Instant::now());

        let record = cache.get(RequestId(1), Address::from_u64(10)).unwrap();
        assert_eq!(record.state, ReplyState::Declined);
        assert_eq!(record.request, request);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail() {
        let mut cache = ReplyCache::default();
        cache.insert_in_flight(RequestId(1), Address::from_u64(10), packet(10, 1, b""), Instant::now());
        cache.insert_in_flight(RequestId(2), Address::from_u64(10), packet(10, 1, b""), Instant::now());
        cache.complete(RequestId(2), Address::from_u64(10), &packet(10, 1, b""), ReplyState::Declined, Instant::now());

        assert!(cache.fail(RequestId(1), Address::from_u64(10), None));
        assert_eq!(cache.get(RequestId(1), Address::from_u64(10)).unwrap().state, ReplyState::Failed(None));

        assert!(!cache.fail(RequestId(2), Address::from_u64(10), None));
        assert_eq!(cache.get(RequestId(2), Address::from_u64(10)).unwrap().state, ReplyState::Declined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let mut cache = ReplyCache::default();
        cache.insert_in_flight(RequestId(1), Address::from_u64(10), packet(10, 1, b""), Instant::now());
        time::advance(Duration::from_secs(30)).await;
        cache.insert_in_flight(RequestId(2), Address::from_u64(10), packet(10, 1, b""), Instant::now());
        time::advance(Duration::from_secs(20)).await;

        // exactly at the retention limit is not expired yet
        assert_eq!(cache.evict_expired(Instant::now(), Duration::from_secs(50)), 0);

        time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.evict_expired(Instant::now(), Duration::from_secs(50)), 1);
        assert!(cache.get(RequestId(1), Address::from_u64(10)).is_none());
        assert!(cache.get(RequestId(2), Address::from_u64(10)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_delays_eviction() {
        let mut cache = ReplyCache::default();
        cache.insert_in_flight(RequestId(1), Address::from_u64(10), packet(10, 1, b""), Instant::now());
        time::advance(Duration::from_secs(40)).await;
        cache.touch(RequestId(1), Address::from_u64(10), Instant::now());
        time::advance(Duration::from_secs(40)).await;

        assert_eq!(cache.evict_expired(Instant::now(), Duration::from_secs(50)), 0);
        assert_eq!(cache.len(), 1);
    }
}
