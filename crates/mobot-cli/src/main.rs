//! Command-line client for driving Android and iOS devices through mobot-core.
//!
//! Each invocation connects to one device, performs one capability call and
//! prints the result as JSON on stdout.
//!
//! # Usage
//!
//! ```bash
//! # List the meaningful elements on an Android screen
//! mobot -k android -d emulator-5554 elements
//!
//! # Tap at coordinates on a simulator
//! mobot -k simulator -d A1B2C3D4-E5F6-7890-ABCD-EF1234567890 tap 120 340
//!
//! # Save a screenshot from a physical iPhone
//! mobot -k ios -d 00008030-001A35E02E38802E screenshot -o screen.png
//!
//! # Move D-pad focus on an Android TV
//! mobot -k android -d 192.168.1.40:5555 navigate "Play"
//!
//! # Record ten seconds of video
//! mobot -k android -d emulator-5554 record --duration 10
//!
//! # Device selection from the environment
//! MOBOT_DEVICE_KIND=android MOBOT_DEVICE=emulator-5554 mobot screen-size
//! ```
//!
//! Exit codes: `0` on success, `1` for errors the user can fix (the message
//! says how), `2` for transport failures.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use base64::Engine;
use clap::{Parser, Subcommand};
use mobot_core::config::MobotConfig;
use mobot_core::driver::{
    connect, Button, DeviceDriver, DeviceKind, DriverContext, DriverError, Orientation,
    SwipeDirection,
};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Drive Android and iOS devices from the command line.
#[derive(Parser)]
#[command(name = "mobot")]
#[command(about = "Control Android devices, iOS devices and iOS simulators")]
#[command(version)]
struct Cli {
    /// Device kind: android, ios or simulator
    #[arg(short = 'k', long, env = "MOBOT_DEVICE_KIND")]
    device_kind: String,

    /// Device serial (Android) or UDID (iOS)
    #[arg(short, long, env = "MOBOT_DEVICE")]
    device: String,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "MOBOT_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(short, long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the meaningful, visible elements on screen
    Elements,

    /// Tap at screen coordinates
    Tap {
        /// X coordinate
        x: u32,
        /// Y coordinate
        y: u32,
    },

    /// Swipe across most of the screen
    Swipe {
        /// Direction: up, down, left, right
        direction: String,
    },

    /// Swipe from a point for a fixed distance
    SwipeFrom {
        /// Start X coordinate
        x: u32,
        /// Start Y coordinate
        y: u32,
        /// Direction: up, down, left, right
        direction: String,
        /// Swipe length in pixels
        #[arg(long)]
        distance: Option<u32>,
    },

    /// Capture a screenshot (base64-encoded PNG unless --output is given)
    Screenshot {
        /// Write the PNG to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Press a hardware or remote button (e.g. HOME, BACK, ENTER)
    PressButton {
        /// Button name
        button: String,
    },

    /// Read or change the screen orientation
    Orientation {
        #[command(subcommand)]
        action: OrientationAction,
    },

    /// Launch an app by package name or bundle identifier
    Launch {
        /// Package name or bundle identifier
        package: String,
    },

    /// Terminate an app
    Terminate {
        /// Package name or bundle identifier
        package: String,
    },

    /// Open a URL or deep link
    OpenUrl {
        /// The URL to open
        url: String,
    },

    /// Type text into the focused input
    SendKeys {
        /// Text to type
        text: String,
    },

    /// Move D-pad focus onto a labelled element (Android TV)
    Navigate {
        /// Element text, content description or hint
        label: String,
    },

    /// Press a single D-pad button (Android TV)
    Dpad {
        /// DPAD_UP, DPAD_DOWN, DPAD_LEFT, DPAD_RIGHT or DPAD_CENTER
        button: String,
    },

    /// Print the screen dimensions
    ScreenSize,

    /// List launchable apps
    ListApps,

    /// Record the screen for a fixed time and print the video path
    Record {
        /// Recording length in seconds
        #[arg(long, default_value = "10")]
        duration: u64,
    },
}

#[derive(Subcommand)]
enum OrientationAction {
    /// Print the current orientation
    Get,
    /// Set the orientation
    Set {
        /// portrait or landscape
        orientation: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

/// Logs go to stderr, or to `log_file` when given. The returned guard
/// flushes the file writer on drop.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().map_or_else(|| "mobot.log".into(), |n| n.to_os_string());
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

#[derive(Debug)]
enum CliError {
    Actionable(String),
    Fatal(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Actionable(_) => ExitCode::from(1),
            CliError::Fatal(_) => ExitCode::from(2),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Actionable(msg) | CliError::Fatal(msg) => f.write_str(msg),
        }
    }
}

impl From<DriverError> for CliError {
    fn from(e: DriverError) -> Self {
        if e.is_actionable() {
            CliError::Actionable(e.to_string())
        } else {
            CliError::Fatal(e.to_string())
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Fatal(format!("IO error: {e}"))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Fatal(format!("Failed to encode output: {e}"))
    }
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<(), CliError> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Argument errors surface before any device is touched.
    let kind: DeviceKind = cli.device_kind.parse()?;
    let request = Request::from_command(cli.command)?;

    let ctx = DriverContext::new(MobotConfig::load());
    let driver = connect(kind, &cli.device, &ctx).await?;
    info!(%kind, device = %cli.device, "connected");

    let output = request.execute(driver.as_ref()).await?;
    print_json(&output, cli.pretty)
}

/// A command with its string arguments already parsed.
enum Request {
    Elements,
    Tap(u32, u32),
    Swipe(SwipeDirection),
    SwipeFrom {
        x: u32,
        y: u32,
        direction: SwipeDirection,
        distance: Option<u32>,
    },
    Screenshot(Option<PathBuf>),
    PressButton(Button),
    GetOrientation,
    SetOrientation(Orientation),
    Launch(String),
    Terminate(String),
    OpenUrl(String),
    SendKeys(String),
    Navigate(String),
    Dpad(Button),
    ScreenSize,
    ListApps,
    Record(Duration),
}

impl Request {
    fn from_command(command: Command) -> Result<Self, DriverError> {
        Ok(match command {
            Command::Elements => Request::Elements,
            Command::Tap { x, y } => Request::Tap(x, y),
            Command::Swipe { direction } => Request::Swipe(direction.parse()?),
            Command::SwipeFrom {
                x,
                y,
                direction,
                distance,
            } => Request::SwipeFrom {
                x,
                y,
                direction: direction.parse()?,
                distance,
            },
            Command::Screenshot { output } => Request::Screenshot(output),
            Command::PressButton { button } => Request::PressButton(button.parse()?),
            Command::Orientation { action } => match action {
                OrientationAction::Get => Request::GetOrientation,
                OrientationAction::Set { orientation } => {
                    Request::SetOrientation(orientation.parse()?)
                }
            },
            Command::Launch { package } => Request::Launch(package),
            Command::Terminate { package } => Request::Terminate(package),
            Command::OpenUrl { url } => Request::OpenUrl(url),
            Command::SendKeys { text } => Request::SendKeys(text),
            Command::Navigate { label } => Request::Navigate(label),
            Command::Dpad { button } => Request::Dpad(button.parse()?),
            Command::ScreenSize => Request::ScreenSize,
            Command::ListApps => Request::ListApps,
            Command::Record { duration } => Request::Record(Duration::from_secs(duration)),
        })
    }

    async fn execute(self, driver: &dyn DeviceDriver) -> Result<serde_json::Value, CliError> {
        let done = json!({ "success": true });
        let value = match self {
            Request::Elements => serde_json::to_value(driver.elements_on_screen().await?)?,
            Request::Tap(x, y) => {
                driver.tap(x, y).await?;
                done
            }
            Request::Swipe(direction) => {
                driver.swipe(direction).await?;
                done
            }
            Request::SwipeFrom {
                x,
                y,
                direction,
                distance,
            } => {
                driver.swipe_from_coordinates(x, y, direction, distance).await?;
                done
            }
            Request::Screenshot(output) => {
                let png = driver.screenshot().await?;
                match output {
                    Some(path) => {
                        tokio::fs::write(&path, &png).await?;
                        json!({ "path": path, "bytes": png.len() })
                    }
                    None => json!({
                        "screenshot": base64::engine::general_purpose::STANDARD.encode(&png)
                    }),
                }
            }
            Request::PressButton(button) => {
                driver.press_button(button).await?;
                done
            }
            Request::GetOrientation => json!({ "orientation": driver.orientation().await? }),
            Request::SetOrientation(orientation) => {
                driver.set_orientation(orientation).await?;
                done
            }
            Request::Launch(package) => {
                driver.launch_app(&package).await?;
                done
            }
            Request::Terminate(package) => {
                driver.terminate_app(&package).await?;
                done
            }
            Request::OpenUrl(url) => {
                driver.open_url(&url).await?;
                done
            }
            Request::SendKeys(text) => {
                driver.send_keys(&text).await?;
                done
            }
            Request::Navigate(label) => {
                driver.navigate_to_label(&label).await?;
                done
            }
            Request::Dpad(button) => {
                driver.press_dpad(button).await?;
                done
            }
            Request::ScreenSize => serde_json::to_value(driver.screen_size().await?)?,
            Request::ListApps => serde_json::to_value(driver.list_apps().await?)?,
            Request::Record(duration) => {
                let id = driver.start_recording().await?;
                eprintln!("Recording {} for {}s", id, duration.as_secs());
                tokio::time::sleep(duration).await;
                let path = driver.stop_recording(&id).await?;
                info!(%id, path = %path.display(), "recording saved");
                json!({ "recording_id": id, "path": path })
            }
        };
        Ok(value)
    }
}
