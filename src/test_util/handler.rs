//! Canned request and reply handlers for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time;

use crate::overlay::packet::Packet;
use crate::reqrep::frame::{ErrorCode, FrameKind, RequestId};
use crate::reqrep::handler::{ReplyHandler, ReplyToken, RequestHandler, Statistics, UserState};
use crate::reqrep::manager::ReqrepManager;

/// Replies immediately, either with a fixed response or with the request's payload. Lossy
///  requests with an empty payload are declined.
#[derive(Default)]
pub struct EchoHandler {
    response: Option<Bytes>,
    num_invocations: AtomicUsize,
}
impl EchoHandler {
    pub fn replying(response: &'static [u8]) -> EchoHandler {
        EchoHandler {
            response: Some(Bytes::from_static(response)),
            num_invocations: Default::default(),
        }
    }

    pub fn num_invocations(&self) -> usize {
        self.num_invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_request(&self, manager: &ReqrepManager, kind: FrameKind, token: ReplyToken, _tag: &str, payload: Bytes, _packet: &Packet) -> anyhow::Result<()> {
        self.num_invocations.fetch_add(1, Ordering::SeqCst);

        let reply = if kind == FrameKind::LossyRequest && payload.is_empty() {
            None
        }
        else {
            Some(self.response.clone().unwrap_or(payload))
        };
        manager.send_reply(token, reply).await?;
        Ok(())
    }
}

/// Keeps reply tokens so a test can answer requests later, or not at all
#[derive(Default)]
pub struct DeferringHandler {
    tokens: Mutex<Vec<ReplyToken>>,
}
impl DeferringHandler {
    pub fn take_tokens(&self) -> Vec<ReplyToken> {
        std::mem::take(&mut *self.tokens.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl RequestHandler for DeferringHandler {
    async fn handle_request(&self, _manager: &ReqrepManager, _kind: FrameKind, token: ReplyToken, _tag: &str, _payload: Bytes, _packet: &Packet) -> anyhow::Result<()> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).push(token);
        Ok(())
    }
}

#[derive(Default)]
pub struct FailingHandler {}

#[async_trait]
impl RequestHandler for FailingHandler {
    async fn handle_request(&self, _manager: &ReqrepManager, _kind: FrameKind, _token: ReplyToken, tag: &str, _payload: Bytes, _packet: &Packet) -> anyhow::Result<()> {
        Err(anyhow!("simulated failure handling {}", tag))
    }
}

#[derive(Default)]
pub struct PanickingHandler {}

#[async_trait]
impl RequestHandler for PanickingHandler {
    async fn handle_request(&self, _manager: &ReqrepManager, _kind: FrameKind, _token: ReplyToken, tag: &str, _payload: Bytes, _packet: &Packet) -> anyhow::Result<()> {
        panic!("simulated panic handling {}", tag)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ReplyEvent {
    Reply {
        id: RequestId,
        tag: String,
        payload: Bytes,
        send_count: u32,
    },
    Error {
        id: RequestId,
        code: ErrorCode,
    },
}

/// Records the callbacks it receives, in order
#[derive(Default)]
pub struct RecordingReplyHandler {
    keep_listening: bool,
    reply_delay: Duration,
    events: Mutex<Vec<ReplyEvent>>,
}
impl RecordingReplyHandler {
    /// a handler that asks for more replies after each one it receives
    pub fn keep_listening() -> RecordingReplyHandler {
        RecordingReplyHandler {
            keep_listening: true,
            ..Default::default()
        }
    }

    /// a handler that takes `reply_delay` to process a reply, recording it when done
    pub fn slow(reply_delay: Duration) -> RecordingReplyHandler {
        RecordingReplyHandler {
            reply_delay,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<ReplyEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ReplyHandler for RecordingReplyHandler {
    async fn handle_reply(&self, _manager: &ReqrepManager, _kind: FrameKind, id: RequestId, tag: &str, payload: Bytes, statistics: Statistics, _user_state: &UserState) -> bool {
        if !self.reply_delay.is_zero() {
            time::sleep(self.reply_delay).await;
        }
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(ReplyEvent::Reply {
            id,
            tag: tag.to_string(),
            payload,
            send_count: statistics.send_count,
        });
        self.keep_listening
    }

    async fn handle_error(&self, _manager: &ReqrepManager, id: RequestId, code: ErrorCode, _user_state: &UserState) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(ReplyEvent::Error { id, code });
    }
}
