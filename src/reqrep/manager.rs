use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio::{select, time};
use tracing::{debug, error, trace, warn};

use crate::overlay::address::Address;
use crate::overlay::overlay::{Overlay, PacketHandler};
use crate::overlay::overlay_events::OverlayEvent;
use crate::overlay::packet::{Packet, RoutingMode};
use crate::overlay::protocol_id::ProtocolId;
use crate::reqrep::error::ReqrepError;
use crate::reqrep::frame::{DataFrame, ErrorCode, ErrorFrame, Frame, FrameKind, RequestId};
use crate::reqrep::handler::{ReplyHandler, ReplyToken, RequestHandler, Statistics, UserState};
use crate::reqrep::registry::HandlerRegistry;
use crate::reqrep::reply_cache::{ReplyCache, ReplyState};
use crate::reqrep::reqrep_config::ReqrepConfig;
use crate::reqrep::request_table::{ReplyContinuation, RequestRecord, RequestTable, Resolution};
use crate::reqrep::sweeper::Sweeper;
use crate::util::random::RngRandom;

pub const REQREP_PROTOCOL_ID: ProtocolId = ProtocolId::REQREP;

/// everything that is guarded by the manager's lock
struct ReqrepState {
    requests: RequestTable,
    replies: ReplyCache,
    handlers: HandlerRegistry,
    sweeper: Sweeper,
}

/// Request / reply semantics on top of an [Overlay] that may drop, duplicate, delay or reorder
///  packets.
///
/// There is one manager per overlay node. It is both client (sending requests, resending them
///  until they are answered, reporting errors and timeouts) and server (dispatching received
///  requests to bound [RequestHandler]s, answering duplicates from a cache of replies).
///
/// The manager's lock is never held while a callback runs, so callbacks may call back into
///  the manager.
pub struct ReqrepManager {
    config: Arc<ReqrepConfig>,
    overlay: Arc<dyn Overlay>,
    is_active: AtomicBool,
    state: Mutex<ReqrepState>,
}

impl ReqrepManager {
    /// The manager starts out inactive, see [ReqrepManager::on_attached]. Fails if the
    ///  configuration is invalid.
    pub fn new(config: Arc<ReqrepConfig>, overlay: Arc<dyn Overlay>) -> anyhow::Result<Arc<ReqrepManager>> {
        config.validate()?;

        Ok(Arc::new(ReqrepManager {
            config: config.clone(),
            overlay,
            is_active: AtomicBool::new(false),
            state: Mutex::new(ReqrepState {
                requests: Default::default(),
                replies: Default::default(),
                handlers: Default::default(),
                sweeper: Sweeper::new(config, Instant::now()),
            }),
        }))
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    pub fn on_attached(&self) {
        debug!("activating request / reply manager");
        self.is_active.store(true, Ordering::Release);
    }

    /// Outstanding requests are not discarded when the node detaches, they keep aging out
    ///  via [ReqrepManager::on_heartbeat].
    pub fn on_detached(&self) {
        debug!("deactivating request / reply manager");
        self.is_active.store(false, Ordering::Release);
    }

    pub fn local_addr(&self) -> Address {
        self.overlay.local_addr()
    }

    pub async fn bind(&self, tag: &str, handler: Arc<dyn RequestHandler>) -> Result<(), ReqrepError> {
        debug!("binding request handler to protocol tag {:?}", tag);
        self.state.lock().await
            .handlers.bind(tag, handler)
    }

    pub async fn unbind(&self, tag: &str, handler: &Arc<dyn RequestHandler>) -> Result<(), ReqrepError> {
        debug!("unbinding request handler from protocol tag {:?}", tag);
        self.state.lock().await
            .handlers.unbind(tag, handler)
    }

    /// Sends a request with the overlay's default (greedy) routing, returning the id that the
    ///  reply handler's callbacks will refer to.
    pub async fn send_request(&self, destination: Address, kind: FrameKind, tag: &str, payload: Bytes, reply_handler: Arc<dyn ReplyHandler>, user_state: UserState) -> Result<RequestId, ReqrepError> {
        self.do_send_request(destination, RoutingMode::Greedy, kind, tag, payload, reply_handler, user_state).await
    }

    /// Same as [ReqrepManager::send_request], but the request is only delivered to the node
    ///  that owns `destination`.
    pub async fn send_exact_request(&self, destination: Address, kind: FrameKind, tag: &str, payload: Bytes, reply_handler: Arc<dyn ReplyHandler>, user_state: UserState) -> Result<RequestId, ReqrepError> {
        self.do_send_request(destination, RoutingMode::Exact, kind, tag, payload, reply_handler, user_state).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn do_send_request(&self, destination: Address, routing: RoutingMode, kind: FrameKind, tag: &str, payload: Bytes, reply_handler: Arc<dyn ReplyHandler>, user_state: UserState) -> Result<RequestId, ReqrepError> {
        if !self.is_active() {
            debug!("inactive - not sending request to {:?}", destination);
            return Err(ReqrepError::Inactive);
        }
        if !kind.is_request() {
            return Err(ReqrepError::InvalidKind(kind));
        }
        if tag.len() > Frame::MAX_TAG_LEN {
            return Err(ReqrepError::TagTooLong { len: tag.len(), max: Frame::MAX_TAG_LEN });
        }

        let (id, packet) = {
            let mut state = self.state.lock().await;

            let id = state.requests.allocate_id::<RngRandom>();
            let data = DataFrame {
                id,
                tag: tag.to_string(),
                payload,
            };
            let frame = match kind {
                FrameKind::LossyRequest => Frame::LossyRequest(data),
                _ => Frame::Request(data),
            };

            let packet = Packet {
                source: self.overlay.local_addr(),
                destination,
                ttl: self.overlay.default_ttl_for(&destination),
                routing,
                protocol: REQREP_PROTOCOL_ID,
                payload: frame.to_bytes(),
            };

            state.requests.insert(RequestRecord {
                id,
                destination,
                kind,
                packet: packet.clone(),
                remaining_retries: self.config.retry_budget,
                send_count: 1,
                last_sent_at: Instant::now(),
                continuation: Arc::new(ReplyContinuation::new(reply_handler, user_state)),
            });
            (id, packet)
        };

        debug!(?id, ?destination, ?kind, "sending request");
        self.overlay.send(packet).await;
        Ok(id)
    }

    /// Answers a request that was passed to a [RequestHandler]. `None` means 'no reply', which
    ///  is only meaningful for a [FrameKind::LossyRequest].
    ///
    /// The reply is cached and sent again whenever a duplicate of the request arrives.
    pub async fn send_reply(&self, token: ReplyToken, reply: Option<Bytes>) -> Result<(), ReqrepError> {
        if !self.is_active() {
            debug!(id = ?token.id, "inactive - not sending reply");
            return Err(ReqrepError::Inactive);
        }

        let reply_packet = reply.map(|payload| self.response_packet(&token.request, Frame::Reply(DataFrame {
            id: token.id,
            tag: token.tag.clone(),
            payload,
        })));

        let reply_state = match &reply_packet {
            Some(packet) => ReplyState::Answered(packet.clone()),
            None => {
                if token.kind != FrameKind::LossyRequest {
                    debug!(id = ?token.id, "declining to answer a request that is not lossy - the requester will time out");
                }
                ReplyState::Declined
            }
        };

        self.state.lock().await
            .replies.complete(token.id, token.requester, &token.request, reply_state, Instant::now());

        if let Some(packet) = reply_packet {
            trace!(id = ?token.id, requester = ?token.requester, "sending reply");
            self.overlay.send(packet).await;
        }
        Ok(())
    }

    /// Periodic tick driving resends, timeouts and cache eviction. It can be called as often as
    ///  convenient, actual work is throttled to once per retry interval.
    ///
    /// Reporting a timeout waits for a reply callback that is still running for the same request,
    ///  so a reply callback that never returns stalls all later timeouts.
    pub async fn on_heartbeat(&self) {
        let outcome = {
            let mut state = self.state.lock().await;
            let state = &mut *state;
            state.sweeper.sweep(Instant::now(), &mut state.requests, &mut state.replies)
        };
        let Some(outcome) = outcome else {
            return;
        };

        if outcome.num_evicted_replies > 0 {
            debug!("evicted {} cached replies", outcome.num_evicted_replies);
        }

        for packet in outcome.resends {
            self.overlay.send(packet).await;
        }

        for record in outcome.timed_out {
            let continuation = record.continuation;
            let mut resolution = continuation.lock_resolution().await;
            if *resolution == Resolution::Resolved {
                continue;
            }
            *resolution = Resolution::Resolved;
            self.notify_error(&continuation, record.id, ErrorCode::Timeout).await;
        }
    }

    /// Entry point for packets from the overlay. Malformed packets are dropped without a
    ///  response.
    pub async fn handle_packet(&self, packet: Packet) {
        if !self.is_active() {
            trace!("inactive - dropping packet from {:?}", packet.source);
            return;
        }
        if packet.protocol != REQREP_PROTOCOL_ID {
            warn!("received packet for protocol {:?} - dropping", packet.protocol);
            return;
        }

        let frame = match Frame::deser(&packet.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("received malformed frame from {:?}: {} - dropping", packet.source, e);
                return;
            }
        };
        trace!(source = ?packet.source, id = ?frame.id(), kind = ?frame.kind(), "received frame");

        match frame {
            Frame::Request(data) => self.on_request(FrameKind::Request, data, packet).await,
            Frame::LossyRequest(data) => self.on_request(FrameKind::LossyRequest, data, packet).await,
            Frame::Reply(data) => self.on_reply(data).await,
            Frame::Error(err) => self.on_error(err, &packet).await,
        }
    }

    async fn on_request(&self, kind: FrameKind, data: DataFrame, packet: Packet) {
        let id = data.id;
        let requester = packet.source;
        let is_final_destination = packet.destination == self.overlay.local_addr();

        let handler = {
            let mut state = self.state.lock().await;
            let now = Instant::now();

            if let Some(record) = state.replies.touch(id, requester, now) {
                let resend = match &record.state {
                    ReplyState::Answered(reply) => Some(reply.clone()),
                    ReplyState::Failed(error) => error.clone(),
                    ReplyState::InFlight | ReplyState::Declined => None,
                };
                drop(state);

                trace!(?id, ?requester, "duplicate request");
                if let Some(resend) = resend {
                    self.overlay.send(resend).await;
                }
                return;
            }

            state.replies.insert_in_flight(id, requester, packet.clone(), now);

            match state.handlers.get(&data.tag) {
                Some(handler) => handler,
                None => {
                    debug!(?id, ?requester, tag = ?data.tag, "no handler bound for request");
                    let error = self.error_packet(is_final_destination, &packet, id, ErrorCode::NoHandler);
                    state.replies.fail(id, requester, error.clone());
                    drop(state);

                    if let Some(error) = error {
                        self.overlay.send(error).await;
                    }
                    return;
                }
            }
        };

        let token = ReplyToken {
            id,
            requester,
            kind,
            tag: data.tag.clone(),
            request: packet.clone(),
        };

        let result = AssertUnwindSafe(handler.handle_request(self, kind, token, &data.tag, data.payload, &packet))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => error!(?id, ?requester, tag = ?data.tag, "request handler failed: {}", e),
            Err(_) => error!(?id, ?requester, tag = ?data.tag, "request handler panicked"),
        }

        let error = self.error_packet(is_final_destination, &packet, id, ErrorCode::HandlerFailure);
        let is_unanswered = self.state.lock().await
            .replies.fail(id, requester, error.clone());
        if !is_unanswered {
            debug!(?id, "request handler failed after replying - not sending an error");
            return;
        }
        if let Some(error) = error {
            self.overlay.send(error).await;
        }
    }

    async fn on_reply(&self, data: DataFrame) {
        let id = data.id;
        let (continuation, send_count) = {
            let state = self.state.lock().await;
            match state.requests.get(id) {
                Some(record) => (record.continuation.clone(), record.send_count),
                None => {
                    trace!(?id, "reply for a request that is not outstanding - discarding");
                    return;
                }
            }
        };

        let mut resolution = continuation.lock_resolution().await;
        if *resolution == Resolution::Resolved {
            trace!(?id, "reply for a request that was resolved concurrently - discarding");
            return;
        }

        let statistics = Statistics { send_count };
        let keep_listening = AssertUnwindSafe(continuation.handler.handle_reply(self, FrameKind::Reply, id, &data.tag, data.payload, statistics, &continuation.user_state))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(?id, "reply handler panicked - no longer listening for replies");
                false
            });

        if !keep_listening {
            *resolution = Resolution::Resolved;
            self.state.lock().await
                .requests.remove_for(id, &continuation);
        }
    }

    async fn on_error(&self, err: ErrorFrame, packet: &Packet) {
        let id = err.id;
        let continuation = {
            let state = self.state.lock().await;
            match state.requests.get(id) {
                Some(record) if record.destination == packet.source => record.continuation.clone(),
                Some(record) => {
                    warn!(?id, "error {:?} for a request to {:?} came from {:?} - ignoring", err.code, record.destination, packet.source);
                    return;
                }
                None => {
                    trace!(?id, "error for a request that is not outstanding - discarding");
                    return;
                }
            }
        };

        let mut resolution = continuation.lock_resolution().await;
        if *resolution == Resolution::Resolved {
            return;
        }
        *resolution = Resolution::Resolved;
        self.state.lock().await
            .requests.remove_for(id, &continuation);

        debug!(?id, "request failed: {:?}", err.code);
        self.notify_error(&continuation, id, err.code).await;
    }

    async fn notify_error(&self, continuation: &ReplyContinuation, id: RequestId, code: ErrorCode) {
        let result = AssertUnwindSafe(continuation.handler.handle_error(self, id, code, &continuation.user_state))
            .catch_unwind()
            .await;
        if result.is_err() {
            error!(?id, "error handler panicked");
        }
    }

    /// Errors are only sent by the node that owns a request's destination address, which keeps
    ///  nodes that see the packet in transit from answering with errors as well.
    fn error_packet(&self, is_final_destination: bool, request: &Packet, id: RequestId, code: ErrorCode) -> Option<Packet> {
        if !is_final_destination {
            return None;
        }
        Some(self.response_packet(request, Frame::Error(ErrorFrame { id, code })))
    }

    /// replies and errors go back to the requester on the exact path
    fn response_packet(&self, request: &Packet, frame: Frame) -> Packet {
        Packet {
            source: self.overlay.local_addr(),
            destination: request.source,
            ttl: self.overlay.default_ttl_for(&request.source),
            routing: RoutingMode::Exact,
            protocol: REQREP_PROTOCOL_ID,
            payload: frame.to_bytes(),
        }
    }

    pub async fn num_pending_requests(&self) -> usize {
        self.state.lock().await.requests.len()
    }

    pub async fn num_cached_replies(&self) -> usize {
        self.state.lock().await.replies.len()
    }
}

#[async_trait]
impl PacketHandler for ReqrepManager {
    fn protocol(&self) -> ProtocolId {
        REQREP_PROTOCOL_ID
    }

    async fn on_packet(&self, packet: Packet) {
        self.handle_packet(packet).await
    }
}

/// Drives a manager for hosts that do not have a heartbeat of their own: ticks the sweeper
///  and tracks the node's lifecycle events. This runs until the event channel is closed.
pub async fn run_reqrep_driver(manager: Arc<ReqrepManager>, mut overlay_events: broadcast::Receiver<OverlayEvent>) -> anyhow::Result<()> {
    let mut heartbeat_ticks = time::interval(manager.config.heartbeat_interval);

    loop {
        select! {
            _ = heartbeat_ticks.tick() => {
                manager.on_heartbeat().await
            }
            evt = overlay_events.recv() => {
                match evt {
                    Ok(OverlayEvent::Attached) => manager.on_attached(),
                    Ok(OverlayEvent::Detached) => manager.on_detached(),
                    Err(RecvError::Lagged(n)) => {
                        warn!("missed {} overlay events - activation state may be stale", n);
                    }
                    Err(RecvError::Closed) => {
                        debug!("overlay event channel closed - shutting down request / reply driver");
                        return Ok(());
                    }
                }
            }
        }
    }
}
