//! Shared test helpers for mobot-core integration tests.
//!
//! Two fakes stand in for the outside world:
//!
//! - [`MockWda`] is a minimal HTTP/1.1 server on a random local port that
//!   records every request and answers through a scripted handler.
//! - [`ScriptedRunner`] is a [`CommandRunner`] that records every command
//!   line and answers through a closure, so driver tests never spawn `adb`,
//!   `xcrun` or `ios`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mobot_core::config::MobotConfig;
use mobot_core::driver::{DriverContext, DriverError};
use mobot_core::process::{CaptureProcess, CommandRunner};

// ---------------------------------------------------------------------------
// Mock WebDriverAgent
// ---------------------------------------------------------------------------

/// One HTTP request as seen by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

type Handler = dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync;

/// A scripted WebDriverAgent stand-in.
pub struct MockWda {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockWda {
    /// Start a server that answers every request with `handler`.
    pub async fn start(
        handler: impl Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let log = log.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    serve_one(stream, log, handler).await;
                });
            }
        });

        Self { addr, requests }
    }

    /// Start a server that behaves like a healthy WebDriverAgent.
    pub async fn healthy() -> Self {
        Self::start(wda_ok).await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests with `method` whose path starts with `prefix`.
    pub fn count(&self, method: &str, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .count()
    }

    /// The first request with `method` whose path ends with `suffix`.
    pub fn find(&self, method: &str, suffix: &str) -> Option<RecordedRequest> {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path.ends_with(suffix))
    }
}

async fn serve_one(
    mut stream: TcpStream,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
    handler: Arc<Handler>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body_end = (header_end + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).into_owned();

    let request = RecordedRequest { method, path, body };
    let (status, response_body) = handler(&request);
    log.lock().unwrap().push(request);

    let response = format!(
        "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response_body}",
        response_body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

pub const SESSION_ID: &str = "sess-1";

/// Default WebDriverAgent behaviour.
pub fn wda_ok(req: &RecordedRequest) -> (u16, String) {
    let session = format!("/session/{SESSION_ID}");
    let body = match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/status") => json!({ "value": { "ready": true } }),
        ("POST", "/session") => json!({ "value": { "sessionId": SESSION_ID }, "sessionId": SESSION_ID }),
        ("GET", p) if p == format!("{session}/wda/screen") => {
            json!({ "value": { "screenSize": { "width": 390, "height": 844 }, "scale": 3 } })
        }
        ("GET", p) if p == format!("{session}/orientation") => json!({ "value": "LANDSCAPE" }),
        ("GET", p) if p.starts_with("/source") => page_source(),
        _ => json!({ "value": null }),
    };
    (200, body.to_string())
}

/// A small page source with one retained button and one hidden one.
pub fn page_source() -> Value {
    json!({
        "value": {
            "type": "Application",
            "name": "Demo",
            "isVisible": "1",
            "rect": { "x": 0, "y": 0, "width": 390, "height": 844 },
            "children": [
                {
                    "type": "Button",
                    "label": "Continue",
                    "name": "continue",
                    "isVisible": "1",
                    "rect": { "x": 20, "y": 700, "width": 350, "height": 50 }
                },
                {
                    "type": "Button",
                    "label": "Collapsed",
                    "isVisible": "1",
                    "rect": { "x": 20, "y": 100, "width": 0, "height": 50 }
                }
            ]
        }
    })
}

// ---------------------------------------------------------------------------
// Scripted command runner
// ---------------------------------------------------------------------------

/// Counts signals delivered to fake capture processes.
#[derive(Default)]
pub struct CaptureSignals {
    pub interrupts: AtomicUsize,
    pub waits: AtomicUsize,
}

struct FakeCapture(Arc<CaptureSignals>);

#[async_trait]
impl CaptureProcess for FakeCapture {
    fn pid(&self) -> Option<u32> {
        Some(31337)
    }

    fn interrupt(&mut self) -> Result<(), DriverError> {
        self.0.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), DriverError> {
        self.0.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Script = dyn Fn(&[String]) -> Result<Vec<u8>, DriverError> + Send + Sync;

/// A [`CommandRunner`] that answers from a closure.
///
/// The closure receives the full command line, program first.
pub struct ScriptedRunner {
    script: Box<Script>,
    calls: Mutex<Vec<Vec<String>>>,
    spawned: Mutex<Vec<Vec<String>>>,
    pub signals: Arc<CaptureSignals>,
}

impl ScriptedRunner {
    pub fn new(
        script: impl Fn(&[String]) -> Result<Vec<u8>, DriverError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            signals: Arc::new(CaptureSignals::default()),
        })
    }

    /// Every `output` call, each joined with spaces.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.join(" ")).collect()
    }

    /// Every `spawn` call, each joined with spaces.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().iter().map(|c| c.join(" ")).collect()
    }

    /// Number of `output` calls containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

fn command_line(program: &Path, args: &[&str]) -> Vec<String> {
    std::iter::once(program.display().to_string())
        .chain(args.iter().map(|a| a.to_string()))
        .collect()
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn output(&self, program: &Path, args: &[&str]) -> Result<Vec<u8>, DriverError> {
        let line = command_line(program, args);
        self.calls.lock().unwrap().push(line.clone());
        (self.script)(&line)
    }

    fn spawn(&self, program: &Path, args: &[&str]) -> Result<Box<dyn CaptureProcess>, DriverError> {
        self.spawned.lock().unwrap().push(command_line(program, args));
        Ok(Box::new(FakeCapture(self.signals.clone())))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Config with every delay zeroed, pointed at `wda_port`.
pub fn fast_config(wda_port: u16) -> MobotConfig {
    MobotConfig {
        wda_host: "127.0.0.1".to_string(),
        wda_port,
        command_timeout_secs: 5,
        recording_settle_ms: 0,
        dpad_settle_ms: 0,
        ..MobotConfig::default()
    }
}

pub fn context(config: MobotConfig, runner: Arc<ScriptedRunner>) -> DriverContext {
    DriverContext::with_runner(config, runner)
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn joined(line: &[String]) -> String {
    line.join(" ")
}

/// A TV launcher dump with focus on `focused_x` and a "Play" tile at x=600.
pub fn tv_dump(focused_x: u32) -> String {
    format!(
        r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node class="android.widget.FrameLayout" text="" bounds="[0,0][1920,1080]">
    <node class="android.widget.TextView" text="Home" focused="{home}" bounds="[{fx},100][{fx_end},300]" />
    <node class="android.widget.TextView" text="Play" focused="{play}" bounds="[600,100][800,300]" />
  </node>
</hierarchy>
UI hierchary dumped to: /dev/tty"#,
        home = focused_x != 600,
        play = focused_x == 600,
        fx = if focused_x == 600 { 0 } else { focused_x },
        fx_end = if focused_x == 600 { 200 } else { focused_x + 200 },
    )
}
