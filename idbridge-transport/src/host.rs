//! Browsing-context abstraction
//!
//! Every participant (the application, a provider window, a provider frame) is
//! a context with an origin and a [`MessageBus`] that receives what other
//! contexts post to it. Surfaces are the handles one context holds on another.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Identity of a browsing context, used to check a message's source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as received by a context
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Serialized origin of the sender
    pub origin: String,
    /// Sending context, when known
    pub source: Option<ContextId>,
    pub data: Value,
}

/// Screen dimensions used to centre popups
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: HashMap<u64, mpsc::UnboundedSender<InboundMessage>>,
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Listener registry of one context.
///
/// Each registered [`Listener`] gets its own FIFO queue and sees every message
/// dispatched after it was registered.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it is unregistered when dropped
    pub fn listen(&self) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, tx);
        trace!(listener = id, "Listener registered");

        Listener {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `message` to every listener. Returns how many received it.
    pub fn dispatch(&self, message: InboundMessage) -> usize {
        let mut inner = lock(&self.inner);
        inner
            .listeners
            .retain(|_, tx| tx.send(message.clone()).is_ok());
        inner.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Drop every listener, as when the context unloads. Pending receives
    /// observe the end of their stream.
    pub fn unload(&self) {
        let mut inner = lock(&self.inner);
        let dropped = inner.listeners.len();
        inner.listeners.clear();
        debug!(dropped, "Message bus unloaded");
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registered message listener
#[derive(Debug)]
pub struct Listener {
    id: u64,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    bus: Weak<Mutex<BusInner>>,
}

impl Listener {
    /// Next message, or `None` once the bus unloaded
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Next queued message, if one has already arrived
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            lock(&inner).listeners.remove(&self.id);
            trace!(listener = self.id, "Listener unregistered");
        }
    }
}

/// Handle on another context that messages can be posted to
pub trait Surface: Send + Sync {
    /// Context behind the handle
    fn context(&self) -> ContextId;

    /// Post `data`. Delivery only happens when `target_origin` is `*` or
    /// equals the surface's origin; otherwise the message is dropped.
    fn post(&self, data: Value, target_origin: &str) -> Result<()>;

    /// Whether the surface was closed, by us or out of band
    fn is_closed(&self) -> bool;

    fn close(&self);
}

/// Provider frame mounted into the application's document
pub trait FrameSurface: Surface {
    /// Replace the frame's inline style
    fn set_style(&self, style: &str);

    fn style(&self) -> String;
}

/// The application's own context: opens windows and mounts frames
pub trait Host: Send + Sync {
    /// Serialized origin of the application
    fn origin(&self) -> String;

    fn context(&self) -> ContextId;

    /// Bus receiving messages posted to the application
    fn bus(&self) -> MessageBus;

    fn screen(&self) -> ScreenSize;

    /// Open (or reuse) the window named `name`. Fails with
    /// `SurfaceUnavailable` when the window cannot be opened.
    fn open_window(&self, url: &str, name: &str, features: &str) -> Result<Arc<dyn Surface>>;

    /// Mount a frame showing `url` with the given inline style
    fn mount_frame(&self, url: &str, style: &str) -> Result<Arc<dyn FrameSurface>>;
}

/// A provider's view of its own context
pub trait ProviderContext: Send + Sync {
    fn origin(&self) -> String;

    fn context(&self) -> ContextId;

    /// Bus receiving messages posted to the provider
    fn bus(&self) -> MessageBus;

    /// The opener (window) or embedding parent (frame)
    fn parent(&self) -> Option<Arc<dyn Surface>>;

    /// Close the provider's own window
    fn close_self(&self);
}
