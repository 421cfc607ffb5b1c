//! In-process host
//!
//! Contexts are plain [`MessageBus`]es and posting is a synchronous dispatch,
//! so a client and a provider can run the full handshake inside one tokio
//! runtime. Every window opened or frame mounted through [`LoopbackHost`] is
//! handed out once via [`LoopbackHost::next_surface`] so provider logic can be
//! attached to it.

use crate::{
    error::{BridgeError, Result},
    host::{
        ContextId, FrameSurface, Host, InboundMessage, MessageBus, ProviderContext, ScreenSize,
        Surface,
    },
    origin::origin_of,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Delivery from one context into another
#[derive(Clone)]
struct Port {
    target_origin: String,
    target_context: ContextId,
    target_bus: MessageBus,
    sender_origin: String,
    sender_context: ContextId,
}

impl Port {
    fn deliver(&self, data: Value, target_origin: &str) {
        if target_origin != "*" && target_origin != self.target_origin {
            debug!(
                target_origin = %target_origin,
                actual = %self.target_origin,
                "Target origin mismatch, message not delivered"
            );
            return;
        }
        let delivered = self.target_bus.dispatch(InboundMessage {
            origin: self.sender_origin.clone(),
            source: Some(self.sender_context),
            data,
        });
        trace!(delivered, to = %self.target_context, "Message posted");
    }
}

/// Shared open/closed state of a provider context
struct ContextState {
    closed: AtomicBool,
    bus: MessageBus,
}

impl ContextState {
    fn shut(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.bus.unload();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Application-side handle on a loopback window
pub struct LoopbackWindow {
    port: Port,
    state: Arc<ContextState>,
}

impl Surface for LoopbackWindow {
    fn context(&self) -> ContextId {
        self.port.target_context
    }

    fn post(&self, data: Value, target_origin: &str) -> Result<()> {
        if self.state.is_closed() {
            debug!("Posting to a closed window, dropped");
            return Ok(());
        }
        self.port.deliver(data, target_origin);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn close(&self) {
        self.state.shut();
    }
}

/// Application-side handle on a loopback frame
pub struct LoopbackFrame {
    window: LoopbackWindow,
    style: Arc<Mutex<String>>,
}

impl Surface for LoopbackFrame {
    fn context(&self) -> ContextId {
        self.window.context()
    }

    fn post(&self, data: Value, target_origin: &str) -> Result<()> {
        self.window.post(data, target_origin)
    }

    fn is_closed(&self) -> bool {
        self.window.is_closed()
    }

    fn close(&self) {
        self.window.close()
    }
}

impl FrameSurface for LoopbackFrame {
    fn set_style(&self, style: &str) {
        *self.style.lock().unwrap_or_else(|p| p.into_inner()) = style.to_string();
    }

    fn style(&self) -> String {
        self.style.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// Handle on the parent, as seen from the provider
struct ParentSurface {
    port: Port,
}

impl Surface for ParentSurface {
    fn context(&self) -> ContextId {
        self.port.target_context
    }

    fn post(&self, data: Value, target_origin: &str) -> Result<()> {
        self.port.deliver(data, target_origin);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn close(&self) {}
}

/// Provider end of an opened window or mounted frame
#[derive(Clone)]
pub struct ProviderEnd {
    url: String,
    origin: String,
    context: ContextId,
    name: Option<String>,
    features: String,
    state: Arc<ContextState>,
    parent: Arc<ParentSurface>,
    style: Option<Arc<Mutex<String>>>,
}

impl ProviderEnd {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Window name; `None` for frames
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Feature string the window was opened with
    pub fn features(&self) -> &str {
        &self.features
    }

    pub fn is_frame(&self) -> bool {
        self.style.is_some()
    }

    /// Current inline style of a frame
    pub fn style(&self) -> Option<String> {
        self.style
            .as_ref()
            .map(|style| style.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Close the window the way a user would, behind the application's back
    pub fn close_by_user(&self) {
        debug!(url = %self.url, "Window closed by user");
        self.state.shut();
    }
}

impl ProviderContext for ProviderEnd {
    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn context(&self) -> ContextId {
        self.context
    }

    fn bus(&self) -> MessageBus {
        self.state.bus.clone()
    }

    fn parent(&self) -> Option<Arc<dyn Surface>> {
        Some(self.parent.clone() as Arc<dyn Surface>)
    }

    fn close_self(&self) {
        self.state.shut();
    }
}

/// Application context of the loopback world
pub struct LoopbackHost {
    origin: String,
    context: ContextId,
    bus: MessageBus,
    screen: ScreenSize,
    popups_blocked: AtomicBool,
    container_missing: AtomicBool,
    opened_tx: mpsc::UnboundedSender<ProviderEnd>,
    opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProviderEnd>>,
}

impl LoopbackHost {
    /// Host whose pages are served from `origin`
    pub fn new(origin: impl Into<String>) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            origin: origin.into(),
            context: ContextId::new(),
            bus: MessageBus::new(),
            screen: ScreenSize::default(),
            popups_blocked: AtomicBool::new(false),
            container_missing: AtomicBool::new(false),
            opened_tx,
            opened_rx: tokio::sync::Mutex::new(opened_rx),
        }
    }

    pub fn with_screen(mut self, screen: ScreenSize) -> Self {
        self.screen = screen;
        self
    }

    /// Make subsequent window opens fail
    pub fn block_popups(&self, blocked: bool) {
        self.popups_blocked.store(blocked, Ordering::SeqCst);
    }

    /// Make subsequent frame mounts fail
    pub fn remove_container(&self, missing: bool) {
        self.container_missing.store(missing, Ordering::SeqCst);
    }

    /// Next opened window or mounted frame, in opening order
    pub async fn next_surface(&self) -> Option<ProviderEnd> {
        self.opened_rx.lock().await.recv().await
    }

    /// Deliver `data` to the application as if posted from `origin` by an
    /// unknown context
    pub fn inject(&self, origin: &str, data: Value) {
        self.bus.dispatch(InboundMessage {
            origin: origin.to_string(),
            source: None,
            data,
        });
    }

    fn connect(
        &self,
        url: &str,
        name: Option<&str>,
        features: &str,
        style: Option<Arc<Mutex<String>>>,
    ) -> Result<LoopbackWindow> {
        let origin = origin_of(url)?;
        let context = ContextId::new();
        let state = Arc::new(ContextState {
            closed: AtomicBool::new(false),
            bus: MessageBus::new(),
        });

        let parent = Arc::new(ParentSurface {
            port: Port {
                target_origin: self.origin.clone(),
                target_context: self.context,
                target_bus: self.bus.clone(),
                sender_origin: origin.clone(),
                sender_context: context,
            },
        });

        let window = LoopbackWindow {
            port: Port {
                target_origin: origin.clone(),
                target_context: context,
                target_bus: state.bus.clone(),
                sender_origin: self.origin.clone(),
                sender_context: self.context,
            },
            state: state.clone(),
        };

        let end = ProviderEnd {
            url: url.to_string(),
            origin,
            context,
            name: name.map(str::to_string),
            features: features.to_string(),
            state,
            parent,
            style,
        };
        if self.opened_tx.send(end).is_err() {
            return Err(BridgeError::ChannelClosed);
        }

        Ok(window)
    }
}

impl Host for LoopbackHost {
    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn context(&self) -> ContextId {
        self.context
    }

    fn bus(&self) -> MessageBus {
        self.bus.clone()
    }

    fn screen(&self) -> ScreenSize {
        self.screen
    }

    fn open_window(&self, url: &str, name: &str, features: &str) -> Result<Arc<dyn Surface>> {
        if self.popups_blocked.load(Ordering::SeqCst) {
            return Err(BridgeError::SurfaceUnavailable(format!(
                "Popup blocked: {}",
                url
            )));
        }
        Ok(Arc::new(self.connect(url, Some(name), features, None)?))
    }

    fn mount_frame(&self, url: &str, style: &str) -> Result<Arc<dyn FrameSurface>> {
        if self.container_missing.load(Ordering::SeqCst) {
            return Err(BridgeError::SurfaceUnavailable(
                "No container to mount the frame into".to_string(),
            ));
        }
        let style = Arc::new(Mutex::new(style.to_string()));
        let window = self.connect(url, None, "", Some(style.clone()))?;
        Ok(Arc::new(LoopbackFrame { window, style }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_messages_cross_both_ways() {
        let host = LoopbackHost::new("https://app.example");
        let mut app_listener = host.bus().listen();

        let window = host
            .open_window("https://nfid.one/x", "w", "")
            .unwrap();
        let provider = host.next_surface().await.unwrap();
        let mut provider_listener = provider.bus().listen();

        window.post(json!("ping"), "https://nfid.one").unwrap();
        let received = provider_listener.recv().await.unwrap();
        assert_eq!(received.data, json!("ping"));
        assert_eq!(received.origin, "https://app.example");
        assert_eq!(received.source, Some(host.context()));

        provider
            .parent()
            .unwrap()
            .post(json!("pong"), "*")
            .unwrap();
        let received = app_listener.recv().await.unwrap();
        assert_eq!(received.origin, "https://nfid.one");
        assert_eq!(received.source, Some(window.context()));
    }

    #[tokio::test]
    async fn test_wrong_target_origin_is_not_delivered() {
        let host = LoopbackHost::new("https://app.example");
        let window = host.open_window("https://nfid.one/x", "w", "").unwrap();
        let provider = host.next_surface().await.unwrap();
        let mut listener = provider.bus().listen();

        window.post(json!(1), "https://other.example").unwrap();
        window.post(json!(2), "*").unwrap();
        assert_eq!(listener.recv().await.unwrap().data, json!(2));
    }

    #[tokio::test]
    async fn test_close_unloads_provider() {
        let host = LoopbackHost::new("https://app.example");
        let window = host.open_window("https://nfid.one/x", "w", "").unwrap();
        let provider = host.next_surface().await.unwrap();
        let mut listener = provider.bus().listen();

        window.close();
        assert!(provider.is_closed());
        assert!(listener.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_user_close_is_visible_to_app() {
        let host = LoopbackHost::new("https://app.example");
        let window = host.open_window("https://nfid.one/x", "w", "").unwrap();
        let provider = host.next_surface().await.unwrap();

        provider.close_by_user();
        assert!(window.is_closed());
    }

    #[tokio::test]
    async fn test_frame_style_is_shared() {
        let host = LoopbackHost::new("https://app.example");
        let frame = host
            .mount_frame("https://nfid.one/embed", "display: none;")
            .unwrap();
        let provider = host.next_surface().await.unwrap();

        assert!(provider.is_frame());
        assert_eq!(provider.style().as_deref(), Some("display: none;"));
        frame.set_style("display: block;");
        assert_eq!(provider.style().as_deref(), Some("display: block;"));
    }
}
