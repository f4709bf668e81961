//! WebDriverAgent HTTP client.
//!
//! WebDriverAgent runs on the iOS device (or simulator) and speaks a
//! W3C-WebDriver-flavoured JSON protocol. Every interactive call here is
//! wrapped in an ephemeral session: [`WebDriverAgent::within_session`]
//! creates a session, runs one operation against its URL and deletes the
//! session again, whether or not the operation succeeded.
//!
//! The page source endpoint is sessionless and returns raw bytes for
//! [`hierarchy::ios`](crate::hierarchy::ios) to parse.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::driver::{Button, DriverError, Orientation, ScreenSize};

/// Errors from the WebDriverAgent transport.
#[derive(Error, Debug)]
pub enum WdaError {
    /// The HTTP request itself failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not valid JSON.
    #[error("invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a non-success status.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },

    /// A field the protocol guarantees was absent or of the wrong type.
    #[error("response is missing `{0}`")]
    MissingField(&'static str),

    /// A field held a value outside the documented set.
    #[error("unexpected {field} value `{value}`")]
    UnexpectedValue { field: &'static str, value: String },
}

/// Buttons WebDriverAgent can press through `wda/pressButton`.
pub const SUPPORTED_BUTTONS: &str = "HOME, VOLUME_UP, VOLUME_DOWN, ENTER";

/// The `wda/pressButton` name for `button`, if it has one.
///
/// `ENTER` is not in this table; it is delivered as a newline keystroke.
pub fn button_name(button: Button) -> Option<&'static str> {
    match button {
        Button::Home => Some("home"),
        Button::VolumeUp => Some("volumeup"),
        Button::VolumeDown => Some("volumedown"),
        _ => None,
    }
}

/// Client for one WebDriverAgent server.
#[derive(Debug, Clone)]
pub struct WebDriverAgent {
    http: Client,
    base_url: String,
}

impl WebDriverAgent {
    /// Create a client for `base_url` (e.g. `http://localhost:8100`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WdaError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Health probe: `GET /status` answered with 200.
    pub async fn is_running(&self) -> bool {
        let url = format!("{}/status", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!(%url, error = %e, "WebDriverAgent status probe failed");
                false
            }
        }
    }

    async fn request(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value, WdaError> {
        debug!(%method, %url, "WebDriverAgent request");
        let mut builder = self.http.request(method.clone(), url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WdaError::Status {
                method,
                url: url.to_string(),
                status,
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get(&self, url: &str) -> Result<Value, WdaError> {
        self.request(Method::GET, url, None).await
    }

    async fn post(&self, url: &str, body: Value) -> Result<Value, WdaError> {
        self.request(Method::POST, url, Some(&body)).await
    }

    /// Open a session and return its id.
    pub async fn create_session(&self) -> Result<String, WdaError> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .post(&url, json!({ "capabilities": { "alwaysMatch": { "platformName": "iOS" } } }))
            .await?;

        response
            .pointer("/value/sessionId")
            .or_else(|| response.get("sessionId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(WdaError::MissingField("value.sessionId"))
    }

    /// Close a session.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), WdaError> {
        let url = format!("{}/session/{session_id}", self.base_url);
        self.request(Method::DELETE, &url, None).await.map(drop)
    }

    /// Run `op` inside a fresh session.
    ///
    /// `op` receives the session URL (`{base}/session/{id}`). The session is
    /// deleted after `op` returns, on success and on failure alike. If `op`
    /// failed its error is returned; if only the delete failed, the failure
    /// is logged and `op`'s result is returned.
    pub async fn within_session<T, F, Fut>(&self, op: F) -> Result<T, WdaError>
    where
        F: FnOnce(String) -> Fut + Send,
        Fut: Future<Output = Result<T, WdaError>> + Send,
        T: Send,
    {
        let session_id = self.create_session().await?;
        let session_url = format!("{}/session/{session_id}", self.base_url);

        let result = op(session_url).await;

        if let Err(e) = self.delete_session(&session_id).await {
            warn!(%session_id, error = %e, "failed to delete WebDriverAgent session");
        }
        result
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn screen_size(&self) -> Result<ScreenSize, WdaError> {
        self.within_session(|session| async move {
            let response = self.get(&format!("{session}/wda/screen")).await?;
            let dimension = |pointer: &str, field| {
                response
                    .pointer(pointer)
                    .and_then(Value::as_f64)
                    .map(|v| v as u32)
                    .ok_or(WdaError::MissingField(field))
            };
            Ok(ScreenSize {
                width: dimension("/value/screenSize/width", "value.screenSize.width")?,
                height: dimension("/value/screenSize/height", "value.screenSize.height")?,
                scale: response
                    .pointer("/value/scale")
                    .and_then(Value::as_f64)
                    .filter(|s| *s > 0.0)
                    .unwrap_or(1.0),
            })
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn send_keys(&self, text: &str) -> Result<(), WdaError> {
        self.within_session(|session| async move {
            self.post(&format!("{session}/wda/keys"), json!({ "value": [text] }))
                .await
                .map(drop)
        })
        .await
    }

    /// Press a button by its WebDriverAgent name (see [`button_name`]).
    #[instrument(skip(self), level = "debug")]
    pub async fn press_button_named(&self, name: &str) -> Result<(), WdaError> {
        self.within_session(|session| async move {
            self.post(&format!("{session}/wda/pressButton"), json!({ "name": name }))
                .await
                .map(drop)
        })
        .await
    }

    /// Press a [`Button`], sending `ENTER` as a newline keystroke.
    ///
    /// Buttons with no WebDriverAgent equivalent are an actionable error.
    pub async fn press_button(&self, button: Button) -> Result<(), DriverError> {
        if button == Button::Enter {
            return Ok(self.send_keys("\n").await?);
        }
        let name = button_name(button).ok_or_else(|| button.unsupported(SUPPORTED_BUTTONS))?;
        Ok(self.press_button_named(name).await?)
    }

    async fn perform_pointer(&self, steps: Value) -> Result<(), WdaError> {
        let body = json!({
            "actions": [{
                "type": "pointer",
                "id": "finger1",
                "parameters": { "pointerType": "touch" },
                "actions": steps,
            }]
        });
        self.within_session(|session| async move {
            self.post(&format!("{session}/actions"), body).await.map(drop)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn tap(&self, x: u32, y: u32) -> Result<(), WdaError> {
        self.perform_pointer(json!([
            { "type": "pointerMove", "duration": 0, "x": x, "y": y },
            { "type": "pointerDown", "button": 0 },
            { "type": "pause", "duration": 100 },
            { "type": "pointerUp", "button": 0 },
        ]))
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn swipe(&self, from: (u32, u32), to: (u32, u32)) -> Result<(), WdaError> {
        self.perform_pointer(json!([
            { "type": "pointerMove", "duration": 0, "x": from.0, "y": from.1 },
            { "type": "pointerDown", "button": 0 },
            { "type": "pointerMove", "duration": 0, "x": to.0, "y": to.1 },
            { "type": "pause", "duration": 1000 },
            { "type": "pointerUp", "button": 0 },
        ]))
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn open_url(&self, url: &str) -> Result<(), WdaError> {
        self.within_session(|session| async move {
            self.post(&format!("{session}/url"), json!({ "url": url }))
                .await
                .map(drop)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn set_orientation(&self, orientation: Orientation) -> Result<(), WdaError> {
        self.within_session(|session| async move {
            self.post(
                &format!("{session}/orientation"),
                json!({ "orientation": orientation.wda_value() }),
            )
            .await
            .map(drop)
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn orientation(&self) -> Result<Orientation, WdaError> {
        self.within_session(|session| async move {
            let response = self.get(&format!("{session}/orientation")).await?;
            let raw = response
                .get("value")
                .and_then(Value::as_str)
                .ok_or(WdaError::MissingField("value"))?;
            raw.parse().map_err(|_| WdaError::UnexpectedValue {
                field: "orientation",
                value: raw.to_string(),
            })
        })
        .await
    }

    /// Fetch the raw JSON page source (`GET /source/?format=json`).
    #[instrument(skip(self), level = "debug")]
    pub async fn page_source(&self) -> Result<Vec<u8>, WdaError> {
        let url = format!("{}/source/?format=json", self.base_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WdaError::Status {
                method: Method::GET,
                url,
                status,
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
