//! Status hub: delivers ledger snapshots to subscribers on one dispatcher task.

use crate::ledger::Totals;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// State published after every mutation and sync run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LedgerSnapshot {
    pub record_count: usize,
    pub totals: Totals,
    pub pending_edits: usize,
    pub pending_deletes: usize,
    pub last_sync_at: Option<i64>,
    pub last_sync_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&LedgerSnapshot) + Send + 'static>;

enum Command {
    Subscribe(SubscriptionId, Callback),
    Unsubscribe(SubscriptionId),
    Publish(LedgerSnapshot),
    Flush(oneshot::Sender<()>),
}

/// Fan-out of [`LedgerSnapshot`]s.
///
/// Callbacks run one at a time on the dispatcher task, in publish order.
/// A new subscriber is first called with the latest snapshot, if any. A
/// callback that panics is unsubscribed; the others keep receiving.
pub struct StatusHub {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
}

impl StatusHub {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx));
        Self {
            commands,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LedgerSnapshot) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.send(Command::Subscribe(id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.send(Command::Unsubscribe(id));
    }

    pub fn publish(&self, snapshot: LedgerSnapshot) {
        self.send(Command::Publish(snapshot));
    }

    /// Resolve once every command sent before this call has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx));
        let _ = rx.await;
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Status dispatcher has stopped; update dropped");
        }
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut subscribers: Vec<(SubscriptionId, Callback)> = Vec::new();
    let mut latest: Option<LedgerSnapshot> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Subscribe(id, callback) => {
                let alive = match &latest {
                    Some(snapshot) => deliver(id, &callback, snapshot),
                    None => true,
                };
                if alive {
                    subscribers.push((id, callback));
                }
            }
            Command::Unsubscribe(id) => subscribers.retain(|(sub, _)| *sub != id),
            Command::Publish(snapshot) => {
                subscribers.retain(|(id, callback)| deliver(*id, callback, &snapshot));
                latest = Some(snapshot);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Run one callback, reporting whether it should stay subscribed.
fn deliver(id: SubscriptionId, callback: &Callback, snapshot: &LedgerSnapshot) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
        Ok(()) => true,
        Err(_) => {
            warn!(subscription = id.0, "Status subscriber panicked, unsubscribing");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn snapshot(count: usize) -> LedgerSnapshot {
        LedgerSnapshot {
            record_count: count,
            ..Default::default()
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<usize>>>, impl Fn(&LedgerSnapshot) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |s: &LedgerSnapshot| {
            sink.lock().unwrap().push(s.record_count)
        })
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub = StatusHub::new();
        let (seen, callback) = recorder();
        hub.subscribe(callback);

        for n in 1..=3 {
            hub.publish(snapshot(n));
        }
        hub.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn late_subscriber_gets_latest() {
        let hub = StatusHub::new();
        hub.publish(snapshot(1));
        hub.publish(snapshot(7));

        let (seen, callback) = recorder();
        hub.subscribe(callback);
        hub.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = StatusHub::new();
        let (seen, callback) = recorder();
        let id = hub.subscribe(callback);

        hub.publish(snapshot(1));
        hub.unsubscribe(id);
        hub.publish(snapshot(2));
        hub.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_stop_delivery() {
        let hub = StatusHub::new();
        hub.subscribe(|s: &LedgerSnapshot| {
            if s.record_count == 1 {
                panic!("subscriber failure");
            }
        });
        let (seen, callback) = recorder();
        hub.subscribe(callback);

        hub.publish(snapshot(1));
        hub.publish(snapshot(2));
        hub.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        let (late, callback) = recorder();
        hub.subscribe(callback);
        hub.flush().await;
        assert_eq!(*late.lock().unwrap(), vec![2]);
    }
}
