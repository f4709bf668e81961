//! Device driver trait for backend-agnostic device control.
//!
//! This module defines the [`DeviceDriver`] trait, which gives Android
//! devices, physical iOS devices and iOS simulators one capability surface:
//! screenshots, element listing, taps, swipes, keys, orientation, app
//! lifecycle and screen recording. Consumers hold a `Box<dyn DeviceDriver>`
//! and never need to know which backend sits behind it.
//!
//! # Backend Selection
//!
//! Use [`DeviceKind`] with [`connect`] to pick a backend at runtime:
//!
//! ```no_run
//! use mobot_core::driver::{connect, DeviceKind, DriverContext};
//! use mobot_core::config::MobotConfig;
//!
//! # async fn example() -> Result<(), mobot_core::driver::DriverError> {
//! let ctx = DriverContext::new(MobotConfig::load());
//! let driver = connect(DeviceKind::Android, "emulator-5554", &ctx).await?;
//! for element in driver.elements_on_screen().await? {
//!     println!("{:?}", element);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::android::AndroidDriver;
use crate::config::MobotConfig;
use crate::element::Element;
use crate::hierarchy::HierarchyError;
use crate::ios_device::IosDeviceDriver;
use crate::process::{CommandRunner, SystemRunner};
use crate::recording::{RecordingError, RecordingRegistry};
use crate::simulator::SimulatorDriver;
use crate::wda::WdaError;

/// Errors that can occur during device driver operations.
///
/// Variants split into two groups. *Actionable* errors describe a condition
/// the user can fix (a missing tunnel, an unsupported button, a label that is
/// not on screen) and their message ends with what to do about it. Everything
/// else is a fatal failure of the underlying transport. Use
/// [`is_actionable`](DriverError::is_actionable) to tell them apart.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The button has no mapping on this backend.
    #[error("Button \"{button}\" is not supported on this device. Supported buttons: {supported}")]
    UnsupportedButton {
        button: String,
        supported: &'static str,
    },

    /// The orientation string is not `portrait` or `landscape`.
    #[error("Unsupported orientation \"{0}\". Use \"portrait\" or \"landscape\".")]
    UnsupportedOrientation(String),

    /// A user-supplied argument could not be interpreted.
    #[error("{0}")]
    InvalidArgument(String),

    /// A D-pad operation was requested on a device without D-pad navigation.
    #[error("This method is only supported on Android TV devices. Use tap or swipe on this device instead.")]
    NotTvDevice,

    /// The WebDriverAgent health probe failed.
    #[error("WebDriverAgent is not running at {url}. Start WebDriverAgent on the device and try again.")]
    WdaNotRunning { url: String },

    /// The go-ios tunnel agent is not listening.
    #[error("iOS tunnel is not running on port {port}. Start it with `ios tunnel start --userspace` and try again.")]
    TunnelNotRunning { port: u16 },

    /// Nothing is listening on the WebDriverAgent forward port.
    #[error("Port forwarding to WebDriverAgent is not running on port {port} (tunnel okay). Start it with `ios forward {port} {port}` and try again.")]
    PortForwardNotRunning { port: u16 },

    /// No element on screen carries the requested label.
    #[error("No element labelled \"{0}\" is on screen. List the elements on screen to check the exact label.")]
    ElementNotFound(String),

    /// No element on screen holds input focus.
    #[error("No focused element on screen. Press a D-pad button to give the screen focus and try again.")]
    NoFocusedElement,

    /// D-pad navigation did not converge.
    #[error("Could not reach \"{label}\" within {steps} D-pad presses. Check that the element can receive focus.")]
    NavigationExhausted { label: String, steps: u32 },

    /// UiAutomator never produced a hierarchy.
    #[error("UI hierarchy was not available after {attempts} attempts. Wait for the screen to settle and try again.")]
    HierarchyUnavailable { attempts: u32 },

    /// The operation is not available on this backend.
    #[error("{0}")]
    Unsupported(String),

    /// A recording could not be stopped.
    #[error(transparent)]
    Recording(#[from] RecordingError),

    /// A subprocess exited unsuccessfully.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// A subprocess did not finish in time.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A UI hierarchy could not be parsed.
    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    /// A WebDriverAgent request failed.
    #[error("WebDriverAgent error: {0}")]
    Wda(#[from] WdaError),

    /// Tool output did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DriverError {
    /// Returns `true` for errors the user can resolve and retry.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            DriverError::UnsupportedButton { .. }
                | DriverError::UnsupportedOrientation(_)
                | DriverError::InvalidArgument(_)
                | DriverError::NotTvDevice
                | DriverError::WdaNotRunning { .. }
                | DriverError::TunnelNotRunning { .. }
                | DriverError::PortForwardNotRunning { .. }
                | DriverError::ElementNotFound(_)
                | DriverError::NoFocusedElement
                | DriverError::NavigationExhausted { .. }
                | DriverError::HierarchyUnavailable { .. }
                | DriverError::Unsupported(_)
                | DriverError::Recording(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Physical or remote-control buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Home,
    Back,
    VolumeUp,
    VolumeDown,
    Enter,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    DpadCenter,
}

const ALL_BUTTONS: &str =
    "HOME, BACK, VOLUME_UP, VOLUME_DOWN, ENTER, DPAD_UP, DPAD_DOWN, DPAD_LEFT, DPAD_RIGHT, DPAD_CENTER";

impl Button {
    /// Every button, in declaration order.
    pub const ALL: [Button; 10] = [
        Button::Home,
        Button::Back,
        Button::VolumeUp,
        Button::VolumeDown,
        Button::Enter,
        Button::DpadUp,
        Button::DpadDown,
        Button::DpadLeft,
        Button::DpadRight,
        Button::DpadCenter,
    ];

    /// The canonical upper-case name (e.g. `VOLUME_UP`).
    pub fn as_str(self) -> &'static str {
        match self {
            Button::Home => "HOME",
            Button::Back => "BACK",
            Button::VolumeUp => "VOLUME_UP",
            Button::VolumeDown => "VOLUME_DOWN",
            Button::Enter => "ENTER",
            Button::DpadUp => "DPAD_UP",
            Button::DpadDown => "DPAD_DOWN",
            Button::DpadLeft => "DPAD_LEFT",
            Button::DpadRight => "DPAD_RIGHT",
            Button::DpadCenter => "DPAD_CENTER",
        }
    }

    /// Returns `true` for the five D-pad buttons.
    pub fn is_dpad(self) -> bool {
        matches!(
            self,
            Button::DpadUp
                | Button::DpadDown
                | Button::DpadLeft
                | Button::DpadRight
                | Button::DpadCenter
        )
    }

    /// Builds the actionable error for a button a backend cannot press.
    pub(crate) fn unsupported(self, supported: &'static str) -> DriverError {
        DriverError::UnsupportedButton {
            button: self.as_str().to_string(),
            supported,
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Button {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Button::ALL
            .into_iter()
            .find(|b| b.as_str() == upper)
            .ok_or_else(|| DriverError::UnsupportedButton {
                button: s.to_string(),
                supported: ALL_BUTTONS,
            })
    }
}

/// Swipe gesture direction, named for the direction the finger moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Default swipe length for [`DeviceDriver::swipe_from_coordinates`].
pub const DEFAULT_SWIPE_DISTANCE: u32 = 300;

impl SwipeDirection {
    /// Start and end points of a full-screen swipe.
    ///
    /// Vertical swipes run between 80% and 20% of the height at the
    /// horizontal center; horizontal swipes between 80% and 20% of the width
    /// at the vertical center.
    pub fn across(self, width: u32, height: u32) -> ((u32, u32), (u32, u32)) {
        let (cx, cy) = (width / 2, height / 2);
        let near = |len: u32| (u64::from(len) * 20 / 100) as u32;
        let far = |len: u32| (u64::from(len) * 80 / 100) as u32;
        match self {
            SwipeDirection::Up => ((cx, far(height)), (cx, near(height))),
            SwipeDirection::Down => ((cx, near(height)), (cx, far(height))),
            SwipeDirection::Left => ((far(width), cy), (near(width), cy)),
            SwipeDirection::Right => ((near(width), cy), (far(width), cy)),
        }
    }

    /// End point of a swipe of `distance` pixels starting at `(x, y)`.
    ///
    /// Clamped at zero on the top and left edges.
    pub fn end_point(self, x: u32, y: u32, distance: u32) -> (u32, u32) {
        match self {
            SwipeDirection::Up => (x, y.saturating_sub(distance)),
            SwipeDirection::Down => (x, y.saturating_add(distance)),
            SwipeDirection::Left => (x.saturating_sub(distance), y),
            SwipeDirection::Right => (x.saturating_add(distance), y),
        }
    }
}

impl fmt::Display for SwipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwipeDirection::Up => "up",
            SwipeDirection::Down => "down",
            SwipeDirection::Left => "left",
            SwipeDirection::Right => "right",
        };
        f.write_str(name)
    }
}

impl FromStr for SwipeDirection {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(SwipeDirection::Up),
            "down" => Ok(SwipeDirection::Down),
            "left" => Ok(SwipeDirection::Left),
            "right" => Ok(SwipeDirection::Right),
            _ => Err(DriverError::InvalidArgument(format!(
                "Swipe direction \"{s}\" is not supported. Use up, down, left or right."
            ))),
        }
    }
}

/// Screen orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    /// The upper-case form WebDriverAgent uses.
    pub fn wda_value(self) -> &'static str {
        match self {
            Orientation::Portrait => "PORTRAIT",
            Orientation::Landscape => "LANDSCAPE",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Portrait => f.write_str("portrait"),
            Orientation::Landscape => f.write_str("landscape"),
        }
    }
}

impl FromStr for Orientation {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            _ => Err(DriverError::UnsupportedOrientation(s.to_string())),
        }
    }
}

/// Screen dimensions. Android reports pixels with scale 1; iOS reports
/// points and the point-to-pixel scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

/// An installed, launchable application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledApp {
    /// Package name (Android) or bundle identifier (iOS).
    pub package_name: String,
    /// Human-readable name; falls back to the package name when unknown.
    pub app_name: String,
}

/// Which backend a device identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Android,
    Ios,
    Simulator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Android => f.write_str("android"),
            DeviceKind::Ios => f.write_str("ios"),
            DeviceKind::Simulator => f.write_str("simulator"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(DeviceKind::Android),
            "ios" => Ok(DeviceKind::Ios),
            "simulator" => Ok(DeviceKind::Simulator),
            _ => Err(DriverError::InvalidArgument(format!(
                "Unknown device kind \"{s}\". Use android, ios or simulator."
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver trait
// ---------------------------------------------------------------------------

/// Trait for backend-agnostic device control.
///
/// A driver is bound to one device identifier for its whole life. Calls are
/// independent: every query re-reads device state, and nothing is cached
/// except what a backend documents (Android caches its device class).
///
/// [`navigate_to_label`](DeviceDriver::navigate_to_label) and
/// [`press_dpad`](DeviceDriver::press_dpad) default to
/// [`DriverError::NotTvDevice`]; only TV-capable backends override them.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// The device identifier this driver is bound to.
    fn device_id(&self) -> &str;

    /// The backend kind.
    fn kind(&self) -> DeviceKind;

    /// Get the screen dimensions.
    async fn screen_size(&self) -> Result<ScreenSize, DriverError>;

    /// Swipe across most of the screen in `direction`.
    async fn swipe(&self, direction: SwipeDirection) -> Result<(), DriverError>;

    /// Swipe from `(x, y)` for `distance` pixels
    /// (default [`DEFAULT_SWIPE_DISTANCE`]).
    async fn swipe_from_coordinates(
        &self,
        x: u32,
        y: u32,
        direction: SwipeDirection,
        distance: Option<u32>,
    ) -> Result<(), DriverError>;

    /// Capture the screen as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    /// List launchable applications.
    async fn list_apps(&self) -> Result<Vec<InstalledApp>, DriverError>;

    /// Launch an application by package name or bundle identifier.
    async fn launch_app(&self, package_name: &str) -> Result<(), DriverError>;

    /// Terminate an application. Terminating a stopped app is not an error.
    async fn terminate_app(&self, package_name: &str) -> Result<(), DriverError>;

    /// Open a URL (web or custom scheme).
    async fn open_url(&self, url: &str) -> Result<(), DriverError>;

    /// Type text into the focused input.
    async fn send_keys(&self, text: &str) -> Result<(), DriverError>;

    /// Press a hardware or remote button.
    async fn press_button(&self, button: Button) -> Result<(), DriverError>;

    /// Tap at screen coordinates.
    async fn tap(&self, x: u32, y: u32) -> Result<(), DriverError>;

    /// List the meaningful, visible elements currently on screen.
    async fn elements_on_screen(&self) -> Result<Vec<Element>, DriverError>;

    /// Change the screen orientation.
    async fn set_orientation(&self, orientation: Orientation) -> Result<(), DriverError>;

    /// Read the current screen orientation.
    async fn orientation(&self) -> Result<Orientation, DriverError>;

    /// Start a screen recording and return its identifier.
    async fn start_recording(&self) -> Result<String, DriverError>;

    /// Stop a recording started on this device and return the host path of
    /// the video.
    async fn stop_recording(&self, recording_id: &str) -> Result<PathBuf, DriverError>;

    /// Move D-pad focus onto the element labelled `label`.
    async fn navigate_to_label(&self, label: &str) -> Result<(), DriverError> {
        let _ = label;
        Err(DriverError::NotTvDevice)
    }

    /// Press a single D-pad button.
    async fn press_dpad(&self, button: Button) -> Result<(), DriverError> {
        let _ = button;
        Err(DriverError::NotTvDevice)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Shared dependencies handed to every driver.
#[derive(Clone)]
pub struct DriverContext {
    pub config: MobotConfig,
    pub runner: Arc<dyn CommandRunner>,
    pub recordings: Arc<RecordingRegistry>,
}

impl DriverContext {
    /// Context backed by real subprocesses and a fresh recording registry.
    pub fn new(config: MobotConfig) -> Self {
        let runner = Arc::new(SystemRunner::new(config.command_timeout()));
        Self {
            config,
            runner,
            recordings: Arc::new(RecordingRegistry::new()),
        }
    }

    /// Context with an injected command runner.
    pub fn with_runner(config: MobotConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            recordings: Arc::new(RecordingRegistry::new()),
        }
    }
}

/// Create a driver for `device_id` using the backend selected by `kind`.
///
/// Android drivers probe the device class here, once.
pub async fn connect(
    kind: DeviceKind,
    device_id: &str,
    ctx: &DriverContext,
) -> Result<Box<dyn DeviceDriver>, DriverError> {
    tracing::debug!(%kind, device_id, "creating driver");
    let driver: Box<dyn DeviceDriver> = match kind {
        DeviceKind::Android => Box::new(AndroidDriver::connect(device_id, ctx).await),
        DeviceKind::Ios => Box::new(IosDeviceDriver::new(device_id, ctx)),
        DeviceKind::Simulator => Box::new(SimulatorDriver::new(device_id, ctx)),
    };
    Ok(driver)
}
