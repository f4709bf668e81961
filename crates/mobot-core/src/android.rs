//! Android backend driven through `adb`.
//!
//! Every capability maps onto an `adb -s <serial> ...` invocation. UI
//! elements come from `uiautomator dump`, parsed by
//! [`hierarchy::android`](crate::hierarchy::android). On TV-class devices
//! (leanback or television feature present) the driver also supports D-pad
//! navigation through [`navigator`](crate::navigator).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::config::MobotConfig;
use crate::driver::{
    Button, DeviceDriver, DeviceKind, DriverContext, DriverError, InstalledApp, Orientation,
    ScreenSize, SwipeDirection, DEFAULT_SWIPE_DISTANCE,
};
use crate::element::{retain_visible, Element, Rect};
use crate::hierarchy::android::{collect_elements, find_by_label, find_focused, parse_tree, UiNode};
use crate::navigator::{next_direction, Direction};
use crate::process::CommandRunner;
use crate::recording::{new_recording_id, Recording, RecordingRegistry};

/// Output UiAutomator produces while its accessibility bridge is not ready.
pub const TRANSIENT_DUMP_MARKER: &str = "null root node returned by UiTestAutomationBridge";

const DPAD_BUTTONS: &str = "DPAD_UP, DPAD_DOWN, DPAD_LEFT, DPAD_RIGHT, DPAD_CENTER";

/// Android form factor, detected once per driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tv,
}

impl DeviceClass {
    /// Classifies `pm list features` output.
    pub fn from_features(features: &str) -> Self {
        if features.contains("android.software.leanback")
            || features.contains("android.hardware.type.television")
        {
            DeviceClass::Tv
        } else {
            DeviceClass::Mobile
        }
    }
}

fn keycode(button: Button) -> &'static str {
    match button {
        Button::Home => "KEYCODE_HOME",
        Button::Back => "KEYCODE_BACK",
        Button::VolumeUp => "KEYCODE_VOLUME_UP",
        Button::VolumeDown => "KEYCODE_VOLUME_DOWN",
        Button::Enter => "KEYCODE_ENTER",
        Button::DpadUp => "KEYCODE_DPAD_UP",
        Button::DpadDown => "KEYCODE_DPAD_DOWN",
        Button::DpadLeft => "KEYCODE_DPAD_LEFT",
        Button::DpadRight => "KEYCODE_DPAD_RIGHT",
        Button::DpadCenter => "KEYCODE_DPAD_CENTER",
    }
}

/// Parses `wm size` output, preferring an override size when one is set.
///
/// ```text
/// Physical size: 1080x2400
/// Override size: 720x1600
/// ```
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let line = output
        .lines()
        .find(|l| l.trim_start().starts_with("Override size"))
        .or_else(|| output.lines().rev().find(|l| !l.trim().is_empty()))?;
    let token = line.split_whitespace().last()?;
    let (width, height) = token.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

/// Extracts launcher packages from `cmd package query-activities` output.
///
/// Each package appears once, in first-seen order.
pub fn parse_launcher_packages(output: &str) -> Vec<InstalledApp> {
    let mut apps: Vec<InstalledApp> = Vec::new();
    for line in output.lines() {
        let Some(package) = line.trim().strip_prefix("packageName=") else {
            continue;
        };
        if package.is_empty() || apps.iter().any(|a| a.package_name == package) {
            continue;
        }
        apps.push(InstalledApp {
            package_name: package.to_string(),
            app_name: package.to_string(),
        });
    }
    apps
}

/// Quotes one argument for the device-side `sh` that `adb shell` runs.
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// [`DeviceDriver`] for an Android device or emulator.
pub struct AndroidDriver {
    serial: String,
    adb: PathBuf,
    device_class: DeviceClass,
    config: MobotConfig,
    runner: Arc<dyn CommandRunner>,
    recordings: Arc<RecordingRegistry>,
}

impl AndroidDriver {
    /// Bind to `serial` and detect the device class.
    ///
    /// Detection failures are not fatal; the device is treated as mobile.
    pub async fn connect(serial: &str, ctx: &DriverContext) -> Self {
        let mut driver = Self {
            serial: serial.to_string(),
            adb: ctx.config.adb_path.clone(),
            device_class: DeviceClass::Mobile,
            config: ctx.config.clone(),
            runner: ctx.runner.clone(),
            recordings: ctx.recordings.clone(),
        };

        driver.device_class = match driver.adb(&["shell", "pm", "list", "features"]).await {
            Ok(out) => DeviceClass::from_features(&String::from_utf8_lossy(&out)),
            Err(e) => {
                debug!(serial, error = %e, "feature probe failed, assuming mobile");
                DeviceClass::Mobile
            }
        };
        debug!(serial, class = ?driver.device_class, "android driver ready");
        driver
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    async fn adb(&self, args: &[&str]) -> Result<Vec<u8>, DriverError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.extend_from_slice(&["-s", self.serial.as_str()]);
        full.extend_from_slice(args);
        self.runner.output(&self.adb, &full).await
    }

    async fn adb_text(&self, args: &[&str]) -> Result<String, DriverError> {
        let out = self.adb(args).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn key_event(&self, button: Button) -> Result<(), DriverError> {
        self.adb(&["shell", "input", "keyevent", keycode(button)]).await.map(drop)
    }

    /// Fetch the raw UiAutomator dump.
    ///
    /// Retries only while the bridge reports a null root node; any other
    /// failure is returned immediately.
    pub async fn dump_hierarchy(&self) -> Result<String, DriverError> {
        let attempts = self.config.max_dump_attempts.max(1);
        for attempt in 1..=attempts {
            match self.adb(&["exec-out", "uiautomator", "dump", "/dev/tty"]).await {
                Ok(out) => {
                    let dump = String::from_utf8_lossy(&out).into_owned();
                    if !dump.contains(TRANSIENT_DUMP_MARKER) {
                        return Ok(dump);
                    }
                }
                Err(DriverError::CommandFailed(msg)) if msg.contains(TRANSIENT_DUMP_MARKER) => {}
                Err(e) => return Err(e),
            }
            warn!(attempt, attempts, "UiAutomator bridge not ready, retrying dump");
        }
        Err(DriverError::HierarchyUnavailable { attempts })
    }

    async fn ui_tree(&self) -> Result<UiNode, DriverError> {
        let dump = self.dump_hierarchy().await?;
        Ok(parse_tree(&dump)?)
    }

    fn require_tv(&self) -> Result<(), DriverError> {
        match self.device_class {
            DeviceClass::Tv => Ok(()),
            DeviceClass::Mobile => Err(DriverError::NotTvDevice),
        }
    }

    /// One navigation step: the direction to press next, or `None` when
    /// focus is already on the target.
    async fn next_dpad_direction(&self, label: &str) -> Result<Option<Direction>, DriverError> {
        let tree = self.ui_tree().await?;
        let target = find_by_label(&tree, label)
            .ok_or_else(|| DriverError::ElementNotFound(label.to_string()))?;
        let focused = find_focused(&tree).ok_or(DriverError::NoFocusedElement)?;

        let rect_of = |node: &UiNode| -> Result<Rect, DriverError> {
            node.rect().ok_or_else(|| {
                DriverError::Parse(format!("unusable bounds {:?}", node.attr("bounds")))
            })
        };
        Ok(next_direction(&rect_of(focused)?, &rect_of(target)?))
    }

    async fn input_swipe(&self, from: (u32, u32), to: (u32, u32)) -> Result<(), DriverError> {
        let coords = [from.0, from.1, to.0, to.1].map(|v| v.to_string());
        self.adb(&[
            "shell", "input", "swipe", &coords[0], &coords[1], &coords[2], &coords[3], "1000",
        ])
        .await
        .map(drop)
    }
}

#[async_trait]
impl DeviceDriver for AndroidDriver {
    fn device_id(&self) -> &str {
        &self.serial
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Android
    }

    #[instrument(skip(self), level = "debug")]
    async fn screen_size(&self) -> Result<ScreenSize, DriverError> {
        let output = self.adb_text(&["shell", "wm", "size"]).await?;
        let (width, height) = parse_wm_size(&output)
            .ok_or_else(|| DriverError::Parse(format!("unexpected `wm size` output: {}", output.trim())))?;
        Ok(ScreenSize {
            width,
            height,
            scale: 1.0,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn swipe(&self, direction: SwipeDirection) -> Result<(), DriverError> {
        let size = self.screen_size().await?;
        let (from, to) = direction.across(size.width, size.height);
        self.input_swipe(from, to).await
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
        self.input_swipe((x, y), to).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let png = self.adb(&["exec-out", "screencap", "-p"]).await?;
        debug!(bytes = png.len(), "screenshot captured");
        Ok(png)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_apps(&self) -> Result<Vec<InstalledApp>, DriverError> {
        let output = self
            .adb_text(&[
                "shell",
                "cmd",
                "package",
                "query-activities",
                "-a",
                "android.intent.action.MAIN",
                "-c",
                "android.intent.category.LAUNCHER",
            ])
            .await?;
        Ok(parse_launcher_packages(&output))
    }

    #[instrument(skip(self), level = "debug")]
    async fn launch_app(&self, package_name: &str) -> Result<(), DriverError> {
        self.adb(&[
            "shell",
            "monkey",
            "-p",
            package_name,
            "-c",
            "android.intent.category.LAUNCHER",
            "1",
        ])
        .await
        .map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn terminate_app(&self, package_name: &str) -> Result<(), DriverError> {
        self.adb(&["shell", "am", "force-stop", package_name]).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn open_url(&self, url: &str) -> Result<(), DriverError> {
        let quoted = shell_quote(url);
        self.adb(&["shell", "am", "start", "-a", "android.intent.action.VIEW", "-d", &quoted])
            .await
            .map(drop)
    }

    #[instrument(skip(self, text), level = "debug")]
    async fn send_keys(&self, text: &str) -> Result<(), DriverError> {
        if text.is_empty() {
            return Ok(());
        }
        let quoted = shell_quote(text);
        self.adb(&["shell", "input", "text", &quoted]).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn press_button(&self, button: Button) -> Result<(), DriverError> {
        self.key_event(button).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn tap(&self, x: u32, y: u32) -> Result<(), DriverError> {
        let (x, y) = (x.to_string(), y.to_string());
        self.adb(&["shell", "input", "tap", &x, &y]).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn elements_on_screen(&self) -> Result<Vec<Element>, DriverError> {
        let tree = self.ui_tree().await?;
        let elements = retain_visible(collect_elements(&tree));
        debug!(element_count = elements.len(), "elements collected");
        Ok(elements)
    }

    #[instrument(skip(self), level = "debug")]
    async fn set_orientation(&self, orientation: Orientation) -> Result<(), DriverError> {
        let value = match orientation {
            Orientation::Portrait => "value:i:0",
            Orientation::Landscape => "value:i:1",
        };
        self.adb(&[
            "shell",
            "content",
            "insert",
            "--uri",
            "content://settings/system",
            "--bind",
            "name:s:user_rotation",
            "--bind",
            value,
        ])
        .await?;
        self.adb(&["shell", "settings", "put", "system", "accelerometer_rotation", "0"])
            .await
            .map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn orientation(&self) -> Result<Orientation, DriverError> {
        let rotation = self
            .adb_text(&["shell", "settings", "get", "system", "user_rotation"])
            .await?;
        Ok(match rotation.trim() {
            "0" => Orientation::Portrait,
            _ => Orientation::Landscape,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_recording(&self) -> Result<String, DriverError> {
        let id = new_recording_id();
        let device_path = format!("/sdcard/mobot-{id}.mp4");
        let host_path = self.config.recordings_dir.join(format!("mobot-{id}.mp4"));

        let process = self.runner.spawn(
            &self.adb,
            &["-s", &self.serial, "shell", "screenrecord", &device_path],
        )?;
        self.recordings
            .insert(Recording::new(id.clone(), &self.serial, device_path, host_path, process))
            .await;
        Ok(id)
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_recording(&self, recording_id: &str) -> Result<PathBuf, DriverError> {
        self.recordings
            .stop(
                recording_id,
                &self.serial,
                self.config.recording_settle(),
                |device_path, host_path| async move {
                    let host = host_path.to_string_lossy().into_owned();
                    if let Err(e) = self.adb(&["pull", &device_path, &host]).await {
                        warn!(%device_path, error = %e, "pull failed, recording left on device");
                        return Err(e);
                    }
                    if let Err(e) = self.adb(&["shell", "rm", "-f", &device_path]).await {
                        warn!(%device_path, error = %e, "failed to remove recording from device");
                    }
                    Ok(())
                },
            )
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn navigate_to_label(&self, label: &str) -> Result<(), DriverError> {
        self.require_tv()?;

        let max_steps = self.config.max_navigation_steps;
        let mut presses = 0;
        while let Some(direction) = self.next_dpad_direction(label).await? {
            if presses >= max_steps {
                return Err(DriverError::NavigationExhausted {
                    label: label.to_string(),
                    steps: max_steps,
                });
            }
            debug!(%direction, presses, "pressing D-pad");
            self.key_event(direction.button()).await?;
            presses += 1;
            tokio::time::sleep(self.config.dpad_settle()).await;
        }
        debug!(presses, "focus reached target");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn press_dpad(&self, button: Button) -> Result<(), DriverError> {
        self.require_tv()?;
        if !button.is_dpad() {
            return Err(button.unsupported(DPAD_BUTTONS));
        }
        self.key_event(button).await
    }
}
