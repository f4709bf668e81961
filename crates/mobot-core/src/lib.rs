//! # mobot-core
//!
//! Core library for controlling Android and iOS devices through one
//! interface.
//!
//! This crate normalizes three very different backends (Android's
//! UiAutomator over `adb`, WebDriverAgent on physical iOS devices, and
//! WebDriverAgent plus `simctl` on simulators) behind the
//! [`DeviceDriver`](driver::DeviceDriver) trait, so screenshots, element
//! listing, taps, swipes, typing, orientation, app lifecycle and screen
//! recording work the same way everywhere.
//!
//! ## Modules
//!
//! - [`element`] - Canonical `Rect`/`Element` model shared by all backends
//! - [`hierarchy`] - UiAutomator XML and WebDriverAgent JSON tree parsers
//! - [`wda`] - WebDriverAgent HTTP client with ephemeral sessions
//! - [`navigator`] - D-pad focus navigation for TV-class devices
//! - [`recording`] - Registry of in-flight screen recordings
//! - [`driver`] - The driver trait, error type and backend factory
//! - [`android`], [`ios_device`], [`simulator`] - The three backends
//! - [`process`] - Subprocess runner used by the backends
//! - [`config`] - Configuration loaded from `~/.mobot/config.json`
//!
//! ## External Dependencies
//!
//! Depending on the backend in use, these tools must be installed:
//!
//! - **Android platform tools** (`adb`), located via `ANDROID_HOME` or `PATH`
//! - **go-ios** (`ios`) for physical iOS devices, located via `GO_IOS_PATH` or `PATH`
//! - **Xcode** (`xcrun simctl`) for simulators
//! - **WebDriverAgent** running on the iOS device or simulator
//!
//! ## Example
//!
//! ```no_run
//! use mobot_core::config::MobotConfig;
//! use mobot_core::driver::{connect, DeviceKind, DriverContext};
//!
//! # async fn example() -> Result<(), mobot_core::driver::DriverError> {
//! let ctx = DriverContext::new(MobotConfig::load());
//! let driver = connect(DeviceKind::Android, "emulator-5554", &ctx).await?;
//!
//! for element in driver.elements_on_screen().await? {
//!     if element.text.as_deref() == Some("Settings") {
//!         let (x, y) = element.rect.center();
//!         driver.tap(x, y).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod android;
pub mod config;
pub mod driver;
pub mod element;
pub mod hierarchy;
pub mod ios_device;
pub mod navigator;
pub mod process;
pub mod recording;
pub mod simulator;
pub mod wda;
