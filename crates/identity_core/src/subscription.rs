use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    task::{Context, Poll},
};

use futures::{stream::BoxStream, Stream, StreamExt};
use shared::domain::{Identity, SessionState};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use crate::backend::{IdentityBackend, IdentityListener, ListenerHandle};

struct Published {
    current: Option<Identity>,
    subscribers: Vec<mpsc::UnboundedSender<Option<Identity>>>,
}

/// Settled identity as seen by observers.
///
/// Every distinct published value is queued to every subscriber in order.
/// Backend notifications are ignored while a compound transition is running;
/// the transition publishes its final identity when it completes.
pub(crate) struct IdentityCell {
    published: Mutex<Published>,
    suspended: AtomicBool,
}

impl IdentityCell {
    pub(crate) fn new(initial: Option<Identity>) -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Published {
                current: initial,
                subscribers: Vec::new(),
            }),
            suspended: AtomicBool::new(false),
        })
    }

    fn published(&self) -> MutexGuard<'_, Published> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn current(&self) -> Option<Identity> {
        self.published().current.clone()
    }

    /// Returns whether the published value changed.
    pub(crate) fn publish(&self, identity: Option<Identity>) -> bool {
        let mut published = self.published();
        if published.current == identity {
            return false;
        }
        published
            .subscribers
            .retain(|tx| tx.send(identity.clone()).is_ok());
        published.current = identity;
        true
    }

    pub(crate) fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub(crate) fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn on_backend_change(&self, identity: Option<Identity>) {
        if self.is_suspended() {
            trace!("identity notification deferred during transition");
            return;
        }
        self.publish(identity);
    }

    /// Queue that starts with the current value and then receives every change.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut published = self.published();
        if tx.send(published.current.clone()).is_ok() {
            published.subscribers.push(tx);
        }
        rx
    }
}

struct ListenerGuard {
    backend: Arc<dyn IdentityBackend>,
    handle: ListenerHandle,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.backend.remove_identity_listener(self.handle);
        debug!(handle = self.handle.0, "identity listener removed");
    }
}

/// Live stream of identity snapshots.
///
/// Yields the current identity first, then every distinct change. Dropping the
/// subscription removes its backend listener.
pub struct IdentitySubscription {
    stream: BoxStream<'static, Option<Identity>>,
    _guard: ListenerGuard,
}

impl IdentitySubscription {
    pub(crate) fn register(backend: Arc<dyn IdentityBackend>, cell: Arc<IdentityCell>) -> Self {
        let rx = cell.subscribe();
        let listener_cell = Arc::clone(&cell);
        let listener: IdentityListener =
            Arc::new(move |identity| listener_cell.on_backend_change(identity));
        let handle = backend.add_identity_listener(listener);
        debug!(handle = handle.0, "identity listener registered");

        Self {
            stream: UnboundedReceiverStream::new(rx).boxed(),
            _guard: ListenerGuard { backend, handle },
        }
    }

    pub fn session_states(self) -> BoxStream<'static, SessionState> {
        self.map(SessionState::from).boxed()
    }
}

impl Stream for IdentitySubscription {
    type Item = Option<Identity>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}
