use tokio::sync::broadcast;
use tracing::trace;

/// Lifecycle events of an overlay node. Protocol layers use them to track whether the node is
///  currently part of the network.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OverlayEvent {
    Attached,
    Detached,
}

pub struct OverlayEventNotifier {
    sender: broadcast::Sender<OverlayEvent>,
}
impl Default for OverlayEventNotifier {
    fn default() -> Self {
        Self::new()
    }
}
impl OverlayEventNotifier {
    pub fn new() -> OverlayEventNotifier {
        let (sender, _) = broadcast::channel(16);

        OverlayEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: OverlayEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
