use tokio::sync::broadcast;

use crate::event::ChangeEvent;

/// The process-wide fan-out point. Each connection's client monitor
/// subscribes its own receiver; a slow subscriber only loses its oldest
/// buffered events (`broadcast::error::RecvError::Lagged`), it never
/// blocks a committing transaction.
#[derive(Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        // No listeners is a normal, expected state (no client connected
        // yet); `send` only errors in that case.
        let _ = self.sender.send(event);
    }
}
