//! Physical iOS device backend.
//!
//! App management and screenshots go through go-ios (`ios --udid <id> ...`);
//! everything interactive goes through WebDriverAgent, reached via a local
//! port forward. Devices on iOS 17 and later additionally need the go-ios
//! tunnel agent running.
//!
//! Before each WebDriverAgent call the driver checks, in order: the tunnel
//! (when required), the forward port, and the WebDriverAgent status
//! endpoint. Each failed check is reported as its own actionable error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::MobotConfig;
use crate::driver::{
    Button, DeviceDriver, DeviceKind, DriverContext, DriverError, InstalledApp, Orientation,
    ScreenSize, SwipeDirection, DEFAULT_SWIPE_DISTANCE,
};
use crate::element::{retain_visible, Element};
use crate::hierarchy;
use crate::process::CommandRunner;
use crate::wda::WebDriverAgent;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const RECORDING_UNSUPPORTED: &str = "Screen recording is not supported on physical iOS devices. \
     Record from an Android device or an iOS simulator instead.";

/// Returns `true` if something accepts TCP connections on `host:port`.
pub async fn is_listening(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeviceInfo {
    product_version: String,
}

/// Major component of an iOS version string (`"17.2.1"` → `17`).
pub fn major_version(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

/// Parses `ios apps --all --list` output (`<bundle id> <name> ...` per line).
pub fn parse_go_ios_apps(output: &str) -> Vec<InstalledApp> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let package_name = parts.next()?.to_string();
            let app_name = parts.next().map_or_else(|| package_name.clone(), str::to_string);
            Some(InstalledApp {
                package_name,
                app_name,
            })
        })
        .collect()
}

/// [`DeviceDriver`] for a physical iOS device.
pub struct IosDeviceDriver {
    udid: String,
    config: MobotConfig,
    runner: Arc<dyn CommandRunner>,
}

impl IosDeviceDriver {
    pub fn new(udid: &str, ctx: &DriverContext) -> Self {
        Self {
            udid: udid.to_string(),
            config: ctx.config.clone(),
            runner: ctx.runner.clone(),
        }
    }

    async fn go_ios(&self, args: &[&str]) -> Result<Vec<u8>, DriverError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.extend_from_slice(&["--udid", self.udid.as_str()]);
        full.extend_from_slice(args);
        self.runner.output(&self.config.go_ios_path, &full).await
    }

    /// The device's iOS version, from `ios info`.
    pub async fn ios_version(&self) -> Result<String, DriverError> {
        let out = self.go_ios(&["info"]).await?;
        let info: DeviceInfo = serde_json::from_slice(&out)
            .map_err(|e| DriverError::Parse(format!("unexpected `ios info` output: {e}")))?;
        Ok(info.product_version)
    }

    async fn tunnel_required(&self) -> Result<bool, DriverError> {
        let version = self.ios_version().await?;
        let major = major_version(&version)
            .ok_or_else(|| DriverError::Parse(format!("unexpected iOS version `{version}`")))?;
        Ok(major >= 17)
    }

    async fn assert_tunnel_running(&self) -> Result<(), DriverError> {
        if self.tunnel_required().await? && !is_listening("localhost", self.config.tunnel_port).await {
            return Err(DriverError::TunnelNotRunning {
                port: self.config.tunnel_port,
            });
        }
        Ok(())
    }

    /// A WebDriverAgent client, after verifying the tunnel, the port
    /// forward and the agent itself.
    pub async fn wda(&self) -> Result<WebDriverAgent, DriverError> {
        self.assert_tunnel_running().await?;

        if !is_listening(&self.config.wda_host, self.config.wda_port).await {
            return Err(DriverError::PortForwardNotRunning {
                port: self.config.wda_port,
            });
        }

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
impl DeviceDriver for IosDeviceDriver {
    fn device_id(&self) -> &str {
        &self.udid
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Ios
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
        self.assert_tunnel_running().await?;

        let path = std::env::temp_dir().join(format!("mobot-screenshot-{}.png", Uuid::new_v4().simple()));
        let path_arg = path.to_string_lossy().into_owned();
        self.go_ios(&["screenshot", "--output", &path_arg]).await?;

        let png = tokio::fs::read(&path).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove screenshot file");
        }
        let png = png?;
        debug!(bytes = png.len(), "screenshot captured");
        Ok(png)
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_apps(&self) -> Result<Vec<InstalledApp>, DriverError> {
        self.assert_tunnel_running().await?;
        let out = self.go_ios(&["apps", "--all", "--list"]).await?;
        Ok(parse_go_ios_apps(&String::from_utf8_lossy(&out)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn launch_app(&self, package_name: &str) -> Result<(), DriverError> {
        self.assert_tunnel_running().await?;
        self.go_ios(&["launch", package_name]).await.map(drop)
    }

    #[instrument(skip(self), level = "debug")]
    async fn terminate_app(&self, package_name: &str) -> Result<(), DriverError> {
        self.assert_tunnel_running().await?;
        self.go_ios(&["kill", package_name]).await.map(drop)
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

    async fn start_recording(&self) -> Result<String, DriverError> {
        Err(DriverError::Unsupported(RECORDING_UNSUPPORTED.to_string()))
    }

    async fn stop_recording(&self, _recording_id: &str) -> Result<PathBuf, DriverError> {
        Err(DriverError::Unsupported(RECORDING_UNSUPPORTED.to_string()))
    }
}
