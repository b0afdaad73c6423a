use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{info, Level};

use overlay_reqrep::overlay::address::Address;
use overlay_reqrep::reqrep::frame::{ErrorCode, FrameKind, RequestId};
use overlay_reqrep::reqrep::handler::{ReplyHandler, Statistics, UserState};
use overlay_reqrep::reqrep::manager::{run_reqrep_driver, ReqrepManager};
use overlay_reqrep::reqrep::reqrep_config::ReqrepConfig;
use overlay_reqrep::test_util::handler::EchoHandler;
use overlay_reqrep::test_util::network::{NetworkConditions, SimulatedNetwork};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        // .with_max_level(Level::DEBUG)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[derive(Default)]
struct Outcomes {
    num_replies: usize,
    num_timeouts: usize,
    total_sends: u32,
}

struct CountingReplyHandler {
    outcomes: Arc<Mutex<Outcomes>>,
}

#[async_trait]
impl ReplyHandler for CountingReplyHandler {
    async fn handle_reply(&self, _manager: &ReqrepManager, _kind: FrameKind, id: RequestId, _tag: &str, payload: Bytes, statistics: Statistics, _user_state: &UserState) -> bool {
        info!("reply to {:?} after {} transmissions: {:?}", id, statistics.send_count, payload);
        let mut outcomes = self.outcomes.lock().await;
        outcomes.num_replies += 1;
        outcomes.total_sends += statistics.send_count;
        false
    }

    async fn handle_error(&self, _manager: &ReqrepManager, id: RequestId, code: ErrorCode, _user_state: &UserState) {
        info!("request {:?} failed: {:?}", id, code);
        if code == ErrorCode::Timeout {
            self.outcomes.lock().await.num_timeouts += 1;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = Arc::new(ReqrepConfig {
        retry_interval: Duration::from_millis(500),
        reply_retention: Duration::from_secs(10),
        heartbeat_interval: Duration::from_millis(100),
        ..Default::default()
    });

    let network = SimulatedNetwork::new(NetworkConditions {
        loss_probability: 0.3,
        duplication_probability: 0.2,
        min_latency: Duration::from_millis(5),
        max_latency: Duration::from_millis(200),
    });

    let mut managers = Vec::new();
    for n in 1..=2 {
        let node = network.add_node(Address::from_u64(n)).await;
        let manager = ReqrepManager::new(config.clone(), node.clone())?;
        node.register_handler(manager.clone()).await;
        tokio::spawn(run_reqrep_driver(manager.clone(), node.subscribe()));
        node.attach();
        managers.push(manager);
    }
    time::sleep(Duration::from_millis(10)).await;

    let echo = Arc::new(EchoHandler::default());
    managers[1].bind("echo", echo.clone()).await?;

    let outcomes = Arc::new(Mutex::new(Outcomes::default()));
    let num_requests = 50;
    for i in 0..num_requests {
        let reply_handler = Arc::new(CountingReplyHandler { outcomes: outcomes.clone() });
        managers[0].send_request(Address::from_u64(2), FrameKind::Request, "echo", Bytes::from(format!("ping {}", i)), reply_handler, Arc::new(())).await?;
    }

    time::sleep(Duration::from_secs(5)).await;

    let outcomes = outcomes.lock().await;
    info!("{} requests: {} replies, {} timeouts, {} handler invocations, {:.2} transmissions per answered request",
        num_requests,
        outcomes.num_replies,
        outcomes.num_timeouts,
        echo.num_invocations(),
        outcomes.total_sends as f64 / outcomes.num_replies.max(1) as f64,
    );
    Ok(())
}
