//! Canonical UI element types shared by every backend.
//!
//! Both hierarchy parsers (UiAutomator XML on Android, WebDriverAgent JSON
//! on iOS) produce [`Element`]s, so callers never see backend-specific node
//! shapes. Elements are rebuilt on every query and carry no identity beyond
//! the query that produced them.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in device pixel space.
///
/// Coordinates are measured from the top-left corner of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// The x-coordinate of the top-left corner.
    pub x: u32,
    /// The y-coordinate of the top-left corner.
    pub y: u32,
    /// The width in pixels.
    pub width: u32,
    /// The height in pixels.
    pub height: u32,
}

impl Rect {
    /// Creates a rectangle from its origin and size.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Builds a rectangle from its corner coordinates.
    ///
    /// Returns `None` when the right/bottom edge lies before the left/top
    /// edge.
    pub fn from_corners(left: u32, top: u32, right: u32, bottom: u32) -> Option<Self> {
        Some(Self {
            x: left,
            y: top,
            width: right.checked_sub(left)?,
            height: bottom.checked_sub(top)?,
        })
    }

    /// Returns `true` if the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The center point, rounded down.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// A UI element in the canonical, backend-agnostic form.
///
/// Optional fields are omitted from the serialized form when absent, and
/// `focused` is only ever present as `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Backend-native classification (e.g. `android.widget.Button`, `Button`).
    #[serde(rename = "type")]
    pub element_type: String,

    /// Visible text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Accessibility label (content description or hint on Android).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Accessibility name (iOS).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Current value, e.g. text field contents or switch state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Resource or accessibility identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Present (and `true`) only for the element holding input focus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focused: Option<bool>,

    /// Position and size on screen.
    pub rect: Rect,
}

impl Element {
    /// Creates an element with only a type and rect set.
    pub fn new(element_type: impl Into<String>, rect: Rect) -> Self {
        Self {
            element_type: element_type.into(),
            text: None,
            label: None,
            name: None,
            value: None,
            identifier: None,
            focused: None,
            rect,
        }
    }

    /// Returns `true` if the element carries any text, name or label.
    pub fn is_meaningful(&self) -> bool {
        [&self.text, &self.name, &self.label]
            .into_iter()
            .any(|field| field.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// Returns `true` if this element holds input focus.
    pub fn is_focused(&self) -> bool {
        self.focused == Some(true)
    }
}

/// Drops every element whose rect has zero width or zero height.
///
/// This is the single visibility gate applied to all backends before
/// elements are handed to a caller.
pub fn retain_visible(mut elements: Vec<Element>) -> Vec<Element> {
    elements.retain(|e| !e.rect.is_empty());
    elements
}

/// Converts an optional attribute into `Some` only when it is non-empty.
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}
