//! iOS Simulator backend built on Apple's `xcrun simctl`.
//!
//! Screenshots, app lifecycle, the app list and screen recording use
//! `simctl` directly. Everything else (taps, swipes, keys, elements,
//! orientation, URLs) goes through a WebDriverAgent instance running in the
//! simulator; unlike physical devices there is no tunnel or port forward to
//! check, only the agent's status endpoint.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available.
//!
//! # Example
//!
//! ```no_run
//! use mobot_core::config::MobotConfig;
//! use mobot_core::driver::{DeviceDriver, DriverContext};
//! use mobot_core::simulator::SimulatorDriver;
//!
//! # async fn example() -> Result<(), mobot_core::driver::DriverError> {
//! let ctx = DriverContext::new(MobotConfig::load());
//! let sim = SimulatorDriver::new("A1B2C3D4-E5F6-7890-ABCD-EF1234567890", &ctx);
//! let png = sim.screenshot().await?;
//! println!("{} bytes", png.len());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};

use crate::config::MobotConfig;
use crate::driver::{
    Button, DeviceDriver, DeviceKind, DriverContext, DriverError, InstalledApp, Orientation,
    ScreenSize, SwipeDirection, DEFAULT_SWIPE_DISTANCE,
};
use crate::element::{retain_visible, Element};
use crate::hierarchy;
use crate::process::CommandRunner;
use crate::recording::{new_recording_id, Recording, RecordingRegistry};
use crate::wda::WebDriverAgent;

const XCRUN: &str = "xcrun";

fn app_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""([^"]+)"\s+=\s+\{([^}]+)\};"#).expect("app pattern is valid"))
}

fn key_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+(\w+)\s+=\s+([^;]+);").expect("key/value pattern is valid"))
}

/// Parses the ASCII property list printed by `simctl listapps`.
///
/// Each app section looks like:
///
/// ```text
/// "com.apple.Preferences" =     {
///     ApplicationType = System;
///     CFBundleDisplayName = Settings;
///     CFBundleIdentifier = "com.apple.Preferences";
///     ...
/// };
/// ```
///
/// # Returns
///
/// One [`InstalledApp`] per section carrying a `CFBundleIdentifier`. The
/// app name is `CFBundleDisplayName`, falling back to `CFBundleName` and
/// then to the identifier.
pub fn parse_app_list(text: &str) -> Vec<InstalledApp> {
    app_pattern()
        .captures_iter(text.trim())
        .filter_map(|section| {
            let body = section.get(2)?.as_str();
            let mut identifier = None;
            let mut display_name = None;
            let mut bundle_name = None;

            for kv in key_value_pattern().captures_iter(body) {
                let (Some(key), Some(value)) = (kv.get(1), kv.get(2)) else {
                    continue;
                };
                let value = value.as_str().trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value)
                    .to_string();
                match key.as_str() {
                    "CFBundleIdentifier" => identifier = Some(value),
                    "CFBundleDisplayName" => display_name = Some(value),
                    "CFBundleName" => bundle_name = Some(value),
                    _ => {}
                }
            }

            let package_name = identifier?;
            let app_name = display_name
                .or(bundle_name)
                .unwrap_or_else(|| package_name.clone());
            Some(InstalledApp {
                package_name,
                app_name,
            })
        })
        .collect()
}

/// [`DeviceDriver`] for a booted iOS Simulator.
pub struct SimulatorDriver {
    udid: String,
    config: MobotConfig,
    runner: Arc<dyn CommandRunner>,
    recordings: Arc<RecordingRegistry>,
}

impl SimulatorDriver {
    pub fn new(udid: &str, ctx: &DriverContext) -> Self {
        Self {
            udid: udid.to_string(),
            config: ctx.config.clone(),
            runner: ctx.runner.clone(),
            recordings: ctx.recordings.clone(),
        }
    }

    async fn simctl(&self, args: &[&str]) -> Result<Vec<u8>, DriverError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("simctl");
        full.extend_from_slice(args);
        self.runner.output(Path::new(XCRUN), &full).await
    }

    /// A WebDriverAgent client, after checking the agent answers.
    pub async fn wda(&self) -> Result<WebDriverAgent, DriverError> {
        let wda = WebDriverAgent::new(self.config.wda_url(), self.config.command_timeout())?;
        if !wda.is_running().await {
            return Err(DriverError::WdaNotRunning {
                url: wda.base_url().to_string(),
            });
        }
        Ok(wda)
    }
}

#[async_trait]
impl DeviceDriver for SimulatorDriver {
    fn device_id(&self) -> &str {
        &self.udid
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Simulator
    }

    #[instrument(skip(self), level = "debug")]
    async fn screen_size(&self) -> Result<ScreenSize, DriverError> {
        Ok(self.wda().await?.screen_size().await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn swipe(&self, direction: SwipeDirection) -> Result<(), DriverError> {
        let wda = self.wda().await?;
        let size = wda.screen_size().await?;
        let (from, to) = direction.across(size.width, size.height);
        Ok(wda.swipe(from, to).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn swipe_from_coordinates(
        &self,
        x: u32,
        y: u32,
        direction: SwipeDirection,
        distance: Option<u32>,
    ) -> Result<(), DriverError> {
        let to = direction.end_point(x, y, distance.unwrap_or(DEFAULT_SWIPE_DISTANCE));
        Ok(self.wda().await?.swipe((x, y), to).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let png = self.simctl(&["io", &self.udid, "screenshot", "-"]).await?;
        debug!(bytes = png.len(), "screenshot captured");
        Ok(png)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_apps(&self) -> Result<Vec<InstalledApp>, DriverError> {
        let out = self.simctl(&["listapps", &self.udid]).await?;
        Ok(parse_app_list(&String::from_utf8_lossy(&out)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn launch_app(&self, package_name: &str) -> Result<(), DriverError> {
        self.simctl(&["launch", &self.udid, package_name]).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn terminate_app(&self, package_name: &str) -> Result<(), DriverError> {
        self.simctl(&["terminate", &self.udid, package_name]).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn open_url(&self, url: &str) -> Result<(), DriverError> {
        Ok(self.wda().await?.open_url(url).await?)
    }

    #[instrument(skip(self, text), level = "debug")]
    async fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        Ok(self.wda().await?.send_keys(text).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn press_button(&self, button: Button) -> Result<(), DriverError> {
        self.wda().await?.press_button(button).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn tap(&self, x: u32, y: u32) -> Result<(), DriverError> {
        Ok(self.wda().await?.tap(x, y).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn elements_on_screen(&self) -> Result<Vec<Element>, DriverError> {
        let source = self.wda().await?.page_source().await?;
        Ok(retain_visible(hierarchy::ios::parse_elements(&source)?))
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_orientation(&self, orientation: Orientation) -> Result<(), DriverError> {
        Ok(self.wda().await?.set_orientation(orientation).await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn orientation(&self) -> Result<Orientation, DriverError> {
        Ok(self.wda().await?.orientation().await?)
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_recording(&self) -> Result<String, DriverError> {
        let id = new_recording_id();
        let host_path = self.config.recordings_dir.join(format!("mobot-{id}.mp4"));
        let host_arg = host_path.to_string_lossy().into_owned();

        let process = self.runner.spawn(
            Path::new(XCRUN),
            &["simctl", "io", &self.udid, "recordVideo", "--force", &host_arg],
        )?;
        self.recordings
            .insert(Recording::new(id.clone(), &self.udid, host_arg, host_path, process))
            .await;
        Ok(id)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_recording(&self, recording_id: &str) -> Result<PathBuf, DriverError> {
        self.recordings
            .stop(
                recording_id,
                &self.udid,
                self.config.recording_settle(),
                |_, host_path| async move {
                    tokio::fs::metadata(&host_path).await?;
                    Ok(())
                },
            )
            .await
    }
}
