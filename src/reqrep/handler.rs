use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::overlay::address::Address;
use crate::overlay::packet::Packet;
use crate::reqrep::frame::{ErrorCode, FrameKind, RequestId};
use crate::reqrep::manager::ReqrepManager;

/// Opaque caller context that is handed back to the [ReplyHandler] with every callback for a
///  request.
pub type UserState = Arc<dyn Any + Send + Sync>;

/// Diagnostics passed along with a reply
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Statistics {
    /// number of times the request was transmitted before this reply arrived
    pub send_count: u32,
}

/// Identifies a received request when answering it via [ReqrepManager::send_reply]. It is
///  consumed by answering, so a request can be answered at most once.
#[derive(Debug)]
pub struct ReplyToken {
    pub(crate) id: RequestId,
    pub(crate) requester: Address,
    pub(crate) kind: FrameKind,
    pub(crate) tag: String,
    pub(crate) request: Packet,
}
impl ReplyToken {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn requester(&self) -> Address {
        self.requester
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn request(&self) -> &Packet {
        &self.request
    }
}

/// Server side: handles requests for a protocol tag it is bound to.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Implementations must eventually call [ReqrepManager::send_reply] with the token, either
    ///  before returning or later. Only a [FrameKind::LossyRequest] may be answered with
    ///  `None`, i.e. no reply.
    ///
    /// Returning an error (or panicking) causes a [ErrorCode::HandlerFailure] error to be sent
    ///  to the requester unless a reply was already sent.
    async fn handle_request(&self, manager: &ReqrepManager, kind: FrameKind, token: ReplyToken, tag: &str, payload: Bytes, packet: &Packet) -> anyhow::Result<()>;
}

/// Client side: receives the outcome of a request.
#[async_trait]
pub trait ReplyHandler: Send + Sync + 'static {
    /// Returns `true` to keep listening for further replies to the same request (e.g. for
    ///  protocols where several nodes may answer), `false` if the request is done.
    ///
    /// Callbacks for the same request are serialized: while this runs, other replies, errors
    ///  and the request's timeout wait for it. Timeouts are reported one request at a time by
    ///  [ReqrepManager::on_heartbeat], so a callback that does not return stalls the heartbeat
    ///  and with it later resends and timeouts of all requests. Long-running work belongs in a
    ///  spawned task.
    async fn handle_reply(&self, manager: &ReqrepManager, kind: FrameKind, id: RequestId, tag: &str, payload: Bytes, statistics: Statistics, user_state: &UserState) -> bool;

    /// Errors are terminal, there are no more callbacks for a request after this. A timeout is
    ///  reported from within [ReqrepManager::on_heartbeat], so this should return promptly.
    async fn handle_error(&self, manager: &ReqrepManager, id: RequestId, code: ErrorCode, user_state: &UserState);
}
