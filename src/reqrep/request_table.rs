use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::overlay::address::Address;
use crate::overlay::packet::Packet;
use crate::reqrep::frame::{FrameKind, RequestId};
use crate::reqrep::handler::{ReplyHandler, UserState};
use crate::util::random::Random;

/// Whether the outcome of a request was delivered to the caller. Once a request is
///  [Resolution::Resolved], no more callbacks happen for it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Resolution {
    Pending,
    Resolved,
}

/// The caller's side of an outstanding request: where its outcome goes.
///
/// Callbacks for a request are delivered while holding its resolution lock. That serializes
///  them per request (several replies racing, or a reply racing a timeout) without holding the
///  manager's shared lock during the callback.
pub struct ReplyContinuation {
    pub handler: Arc<dyn ReplyHandler>,
    pub user_state: UserState,
    resolution: Mutex<Resolution>,
}
impl ReplyContinuation {
    pub fn new(handler: Arc<dyn ReplyHandler>, user_state: UserState) -> ReplyContinuation {
        ReplyContinuation {
            handler,
            user_state,
            resolution: Mutex::new(Resolution::Pending),
        }
    }

    pub async fn lock_resolution(&self) -> MutexGuard<'_, Resolution> {
        self.resolution.lock().await
    }
}

/// Client side bookkeeping for a request that is waiting for a reply.
pub struct RequestRecord {
    pub id: RequestId,
    pub destination: Address,
    pub kind: FrameKind,
    /// the request as it was first sent, kept for resending it verbatim
    pub packet: Packet,
    pub remaining_retries: u32,
    pub send_count: u32,
    pub last_sent_at: Instant,
    pub continuation: Arc<ReplyContinuation>,
}

/// Outstanding requests, keyed by request id.
#[derive(Default)]
pub struct RequestTable {
    records: FxHashMap<RequestId, RequestRecord>,
}

impl RequestTable {
    /// Picks a random id that is not currently in use. The id space is big enough that
    ///  collisions are rare, but they are checked for nonetheless.
    pub fn allocate_id<R: Random>(&self) -> RequestId {
        loop {
            let candidate = R::request_id();
            if !self.records.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn insert(&mut self, record: RequestRecord) {
        let prev = self.records.insert(record.id, record);
        debug_assert!(prev.is_none(), "request ids must be allocated via allocate_id");
    }

    pub fn get(&self, id: RequestId) -> Option<&RequestRecord> {
        self.records.get(&id)
    }

    /// Removes a record, but only if it still belongs to the given continuation: by the time a
    ///  callback finishes, its record may have timed out and the id may have been reused.
    pub fn remove_for(&mut self, id: RequestId, continuation: &Arc<ReplyContinuation>) -> Option<RequestRecord> {
        match self.records.get(&id) {
            Some(record) if Arc::ptr_eq(&record.continuation, continuation) => self.records.remove(&id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut RequestRecord> {
        self.records.values_mut()
    }

    pub(crate) fn remove(&mut self, id: RequestId) -> Option<RequestRecord> {
        self.records.remove(&id)
    }
}
