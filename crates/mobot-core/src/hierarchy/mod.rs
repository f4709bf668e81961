//! Parsers that turn backend-native UI trees into canonical [`Element`]s.
//!
//! - [`android`] walks a UiAutomator XML dump.
//! - [`ios`] walks a WebDriverAgent JSON page source.
//!
//! Both are pure functions over an already-fetched tree and traverse with an
//! explicit stack, so nesting depth is unbounded. Neither applies the
//! zero-area filter; callers run [`retain_visible`](crate::element::retain_visible)
//! on the result.
//!
//! [`Element`]: crate::element::Element

pub mod android;
pub mod ios;

use thiserror::Error;

/// Errors raised while parsing a UI hierarchy.
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// The expected root element was not present in the input.
    #[error("hierarchy root `{0}` not found in dump")]
    MissingRoot(&'static str),

    /// The input ended before every opened node was closed.
    #[error("hierarchy dump truncated with {0} unclosed node(s)")]
    Truncated(usize),

    /// The XML could not be tokenized.
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The JSON could not be decoded into a page source tree.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}
