use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::Layout;

use super::EngineError;

type LayoutUpdate = Result<Layout, EngineError>;

/// Engine-side half of a layout subscription.
#[derive(Debug, Clone)]
pub struct LayoutPublisher {
    tx: mpsc::UnboundedSender<LayoutUpdate>,
    released: CancellationToken,
}

impl LayoutPublisher {
    /// Delivers an update. Returns `false` once the subscriber has released
    /// the subscription, after which the publisher should be dropped.
    pub fn publish(&self, update: LayoutUpdate) -> bool {
        if self.is_released() {
            return false;
        }
        self.tx.send(update).is_ok()
    }

    pub fn is_released(&self) -> bool {
        self.released.is_cancelled() || self.tx.is_closed()
    }
}

/// Subscriber-side handle. Updates arrive in emission order; releasing the
/// handle (explicitly or by dropping it) stops delivery immediately.
#[derive(Debug)]
pub struct LayoutSubscription {
    rx: mpsc::UnboundedReceiver<LayoutUpdate>,
    released: CancellationToken,
}

impl LayoutSubscription {
    pub fn channel() -> (LayoutPublisher, LayoutSubscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = CancellationToken::new();
        (
            LayoutPublisher {
                tx,
                released: released.clone(),
            },
            LayoutSubscription { rx, released },
        )
    }

    /// Next update, or `None` once released or the engine side is gone.
    pub async fn next(&mut self) -> Option<LayoutUpdate> {
        if self.released.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.released.cancelled() => None,
            update = self.rx.recv() => update,
        }
    }

    pub fn unsubscribe(&mut self) {
        self.released.cancel();
        self.rx.close();
    }

    pub fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }
}

impl Drop for LayoutSubscription {
    fn drop(&mut self) {
        self.released.cancel();
    }
}
