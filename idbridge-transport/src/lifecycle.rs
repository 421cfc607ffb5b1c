//! Provider window and frame lifecycle
//!
//! [`LifecycleManager`] owns the single popup window of its slot: opening a new
//! one closes the previous one, and while a window is open a poller watches for
//! the user closing it. [`FrameManager`] does the same for an embedded frame,
//! which is toggled visible and hidden instead of opened and closed.

use crate::{
    error::{BridgeError, Result},
    host::{FrameSurface, Host, ScreenSize, Surface},
    origin::origin_of,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Window name shared by every flow, so a new flow reuses the old window
pub const DEFAULT_WINDOW_NAME: &str = "nfidSdk";

/// How often an open window is checked for out-of-band closure
pub const INTERRUPTION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest poll period the manager accepts
pub const MIN_INTERRUPTION_CHECK_INTERVAL: Duration = Duration::from_millis(10);

const DEFAULT_HEIGHT: f64 = 705.0;
const DEFAULT_WIDTH: f64 = 525.0;

/// Popup window features. Unset fields are left out of the feature string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowFeatures {
    pub height: Option<f64>,
    pub width: Option<f64>,
    pub top: Option<f64>,
    pub left: Option<f64>,
    pub toolbar: Option<bool>,
    pub location: Option<bool>,
    pub menubar: Option<bool>,
}

impl WindowFeatures {
    /// 705x525, centred on `screen`, without toolbar, location or menu bar
    pub fn defaults(screen: ScreenSize) -> Self {
        Self {
            height: Some(DEFAULT_HEIGHT),
            width: Some(DEFAULT_WIDTH),
            top: Some(screen.height / 2.0 - DEFAULT_HEIGHT / 2.0),
            left: Some(screen.width / 2.0 - DEFAULT_WIDTH / 2.0),
            toolbar: Some(false),
            location: Some(false),
            menubar: Some(false),
        }
    }

    /// Field-by-field override: every field set in `overrides` wins
    pub fn merge(self, overrides: &WindowFeatures) -> Self {
        Self {
            height: overrides.height.or(self.height),
            width: overrides.width.or(self.width),
            top: overrides.top.or(self.top),
            left: overrides.left.or(self.left),
            toolbar: overrides.toolbar.or(self.toolbar),
            location: overrides.location.or(self.location),
            menubar: overrides.menubar.or(self.menubar),
        }
    }

    /// `key=value,` for each set field; booleans render as `1`/`0`
    pub fn stringify(&self) -> String {
        let numbers = [
            ("height", self.height),
            ("width", self.width),
            ("top", self.top),
            ("left", self.left),
        ];
        let flags = [
            ("toolbar", self.toolbar),
            ("location", self.location),
            ("menubar", self.menubar),
        ];

        let mut out = String::new();
        for (key, value) in numbers {
            if let Some(value) = value {
                let _ = write!(out, "{}={},", key, value);
            }
        }
        for (key, value) in flags {
            if let Some(value) = value {
                let _ = write!(out, "{}={},", key, u8::from(value));
            }
        }
        out
    }
}

/// Window features as given by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeaturesSpec {
    /// Passed to the host verbatim
    Raw(String),
    /// Merged over the defaults
    Features(WindowFeatures),
}

impl FeaturesSpec {
    /// Feature string to open a window with
    pub fn resolve(spec: Option<&FeaturesSpec>, screen: ScreenSize) -> String {
        let defaults = WindowFeatures::defaults(screen);
        match spec {
            Some(FeaturesSpec::Raw(raw)) => raw.clone(),
            Some(FeaturesSpec::Features(features)) => defaults.merge(features).stringify(),
            None => defaults.stringify(),
        }
    }
}

impl From<WindowFeatures> for FeaturesSpec {
    fn from(features: WindowFeatures) -> Self {
        FeaturesSpec::Features(features)
    }
}

/// Opened provider window, as handed to a flow
#[derive(Clone)]
pub struct ChannelHandle {
    surface: Arc<dyn Surface>,
    origin: String,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("context", &self.surface.context())
            .field("origin", &self.origin)
            .finish()
    }
}

impl ChannelHandle {
    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }

    /// Origin of the provider page
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Post to the provider, addressed to its origin
    pub fn post<T: Serialize>(&self, message: &T) -> Result<()> {
        self.surface
            .post(serde_json::to_value(message)?, &self.origin)
    }
}

struct OpenWindow {
    handle: ChannelHandle,
    released: Arc<AtomicBool>,
    poller: JoinHandle<()>,
}

impl OpenWindow {
    fn release(self) {
        self.released.store(true, Ordering::SeqCst);
        self.poller.abort();
        self.handle.surface.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the provider window of one slot
pub struct LifecycleManager {
    host: Arc<dyn Host>,
    name: String,
    interval: Duration,
    slot: Mutex<Option<OpenWindow>>,
}

impl LifecycleManager {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            name: DEFAULT_WINDOW_NAME.to_string(),
            interval: INTERRUPTION_CHECK_INTERVAL,
            slot: Mutex::new(None),
        }
    }

    pub fn with_window_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Poll period for out-of-band closure, raised to
    /// [`MIN_INTERRUPTION_CHECK_INTERVAL`] when shorter
    pub fn with_interruption_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERRUPTION_CHECK_INTERVAL {
            warn!(?interval, "Interruption check interval too short, clamping");
        }
        self.interval = interval.max(MIN_INTERRUPTION_CHECK_INTERVAL);
        self
    }

    /// Open the provider window at `url`, closing any window this manager
    /// already holds. `on_interrupt` runs at most once, when the window is
    /// found closed while still owned by the manager.
    ///
    /// Must be called within a tokio runtime.
    pub fn open<F>(
        &self,
        url: &str,
        features: Option<&FeaturesSpec>,
        on_interrupt: F,
    ) -> Result<ChannelHandle>
    where
        F: FnOnce(BridgeError) + Send + 'static,
    {
        let origin = origin_of(url)?;
        self.close();

        let features = FeaturesSpec::resolve(features, self.host.screen());
        let surface = self.host.open_window(url, &self.name, &features)?;
        info!(url = %url, window = %self.name, "Provider window opened");

        let handle = ChannelHandle {
            surface: surface.clone(),
            origin,
        };
        let released = Arc::new(AtomicBool::new(false));
        let poller = tokio::spawn(watch_interruption(
            surface,
            released.clone(),
            self.interval,
            on_interrupt,
        ));

        let previous = lock(&self.slot).replace(OpenWindow {
            handle: handle.clone(),
            released,
            poller,
        });
        if let Some(previous) = previous {
            previous.release();
        }

        Ok(handle)
    }

    /// Post to the open window
    pub fn post<T: Serialize>(&self, message: &T) -> Result<()> {
        match self.handle() {
            Some(handle) => handle.post(message),
            None => Err(BridgeError::SurfaceUnavailable(
                "No provider window open".to_string(),
            )),
        }
    }

    /// Close the window and stop polling. Does nothing when nothing is open.
    pub fn close(&self) {
        let open = lock(&self.slot).take();
        if let Some(open) = open {
            debug!(origin = %open.handle.origin, "Closing provider window");
            open.release();
        }
    }

    /// Close the window behind `handle` if this manager still holds it
    pub fn release(&self, handle: &ChannelHandle) {
        let mut slot = lock(&self.slot);
        let held = slot
            .as_ref()
            .is_some_and(|open| open.handle.surface.context() == handle.surface.context());
        let open = if held { slot.take() } else { None };
        drop(slot);
        if let Some(open) = open {
            debug!(origin = %open.handle.origin, "Releasing provider window");
            open.release();
        }
    }

    pub fn handle(&self) -> Option<ChannelHandle> {
        lock(&self.slot).as_ref().map(|open| open.handle.clone())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.close();
    }
}

async fn watch_interruption<F>(
    surface: Arc<dyn Surface>,
    released: Arc<AtomicBool>,
    interval: Duration,
    on_interrupt: F,
) where
    F: FnOnce(BridgeError) + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        if released.load(Ordering::SeqCst) {
            return;
        }
        if surface.is_closed() {
            warn!("Provider window closed by the user");
            on_interrupt(BridgeError::UserInterrupted);
            return;
        }
    }
}

/// Inline style of the provider frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameStyle(BTreeMap<String, String>);

impl Default for FrameStyle {
    fn default() -> Self {
        Self::from_pairs([
            ("position", "absolute"),
            ("top", "75px"),
            ("right", "10px"),
            ("border", "none"),
            ("border-radius", "0.75rem"),
            ("width", "440px"),
            ("height", "580px"),
            ("z-index", "10"),
            ("box-shadow", "0px 0px 60px 0px rgba(48,139,245,0.56)"),
            ("background", "white"),
        ])
    }
}

impl FrameStyle {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.0.insert(property.into(), value.into());
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.0.get(property).map(String::as_str)
    }

    /// Copy of the style with `display` set
    pub fn with_display(&self, display: &str) -> Self {
        let mut style = self.clone();
        style.set("display", display);
        style
    }

    /// `property: value;` pairs
    pub fn to_css(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}: {};", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct MountedFrame {
    surface: Arc<dyn FrameSurface>,
    origin: String,
    visible: bool,
}

/// Owns the embedded provider frame
pub struct FrameManager {
    host: Arc<dyn Host>,
    style: Mutex<FrameStyle>,
    frame: Mutex<Option<MountedFrame>>,
}

impl FrameManager {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            style: Mutex::new(FrameStyle::default()),
            frame: Mutex::new(None),
        }
    }

    /// Mount a hidden frame showing `url`, replacing any mounted frame
    pub fn mount(&self, url: &str, style: Option<FrameStyle>) -> Result<()> {
        let origin = origin_of(url)?;
        self.unmount();

        let base = {
            let mut current = lock(&self.style);
            if let Some(style) = style {
                *current = style;
            }
            current.clone()
        };

        let surface = self
            .host
            .mount_frame(url, &base.with_display("none").to_css())?;
        info!(url = %url, "Provider frame mounted");

        *lock(&self.frame) = Some(MountedFrame {
            surface,
            origin,
            visible: false,
        });
        Ok(())
    }

    pub fn show(&self) -> Result<()> {
        self.set_display(true)
    }

    pub fn hide(&self) -> Result<()> {
        self.set_display(false)
    }

    fn set_display(&self, visible: bool) -> Result<()> {
        let style = lock(&self.style)
            .with_display(if visible { "block" } else { "none" })
            .to_css();

        let mut frame = lock(&self.frame);
        let frame = frame.as_mut().ok_or_else(|| {
            BridgeError::SurfaceUnavailable("Provider frame not mounted".to_string())
        })?;
        frame.surface.set_style(&style);
        frame.visible = visible;
        debug!(visible, "Provider frame display changed");
        Ok(())
    }

    pub fn is_visible(&self) -> bool {
        lock(&self.frame).as_ref().is_some_and(|frame| frame.visible)
    }

    pub fn is_mounted(&self) -> bool {
        lock(&self.frame).is_some()
    }

    pub fn surface(&self) -> Option<Arc<dyn FrameSurface>> {
        lock(&self.frame).as_ref().map(|frame| frame.surface.clone())
    }

    /// Origin of the mounted frame
    pub fn origin(&self) -> Option<String> {
        lock(&self.frame).as_ref().map(|frame| frame.origin.clone())
    }

    /// Post to the mounted frame, addressed to its origin
    pub fn post(&self, data: Value) -> Result<()> {
        let frame = lock(&self.frame);
        let frame = frame.as_ref().ok_or_else(|| {
            BridgeError::SurfaceUnavailable("Provider frame not mounted".to_string())
        })?;
        frame.surface.post(data, &frame.origin)
    }

    pub fn unmount(&self) {
        let frame = lock(&self.frame).take();
        if let Some(frame) = frame {
            frame.surface.close();
            debug!(origin = %frame.origin, "Provider frame removed");
        }
    }
}
