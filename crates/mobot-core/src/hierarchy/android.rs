//! UiAutomator XML dump parsing.
//!
//! `uiautomator dump` emits a `<hierarchy>` root with nested `<node>`
//! elements whose attributes describe each view. The dump is first
//! normalized into an owned [`UiNode`] tree (every node has zero or more
//! children), then flattened into [`Element`]s or searched for navigation.

use std::collections::HashMap;
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::trace;

use super::HierarchyError;
use crate::element::{non_empty, Element, Rect};

/// A single view from the dump, with its attributes and children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiNode {
    /// Raw attribute values keyed by attribute name.
    pub attributes: HashMap<String, String>,
    /// Child views in document order.
    pub children: Vec<UiNode>,
}

impl Drop for UiNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl UiNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, HierarchyError> {
        let mut attributes = HashMap::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.insert(key, value);
        }
        Ok(Self {
            attributes,
            children: Vec::new(),
        })
    }

    /// Returns the attribute value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Parses the `bounds` attribute.
    ///
    /// Returns `None` when the attribute is missing or malformed.
    pub fn rect(&self) -> Option<Rect> {
        self.attr("bounds").and_then(parse_bounds)
    }

    /// Returns `true` if UiAutomator reported this node as focused.
    pub fn is_focused(&self) -> bool {
        self.attr("focused") == Some("true")
    }

    /// Returns `true` if `label` equals the node's text, content
    /// description or hint.
    pub fn has_label(&self, label: &str) -> bool {
        ["text", "content-desc", "hint"]
            .iter()
            .any(|key| self.attr(key) == Some(label))
    }

    fn to_element(&self) -> Option<Element> {
        let text = non_empty(self.attr("text"));
        let label = non_empty(self.attr("content-desc")).or_else(|| non_empty(self.attr("hint")));
        if text.is_none() && label.is_none() {
            return None;
        }

        let Some(rect) = self.rect() else {
            trace!(bounds = ?self.attr("bounds"), "skipping node with unusable bounds");
            return None;
        };

        let mut element = Element::new(non_empty(self.attr("class")).unwrap_or_else(|| "text".into()), rect);
        element.text = text;
        element.label = label;
        element.identifier = non_empty(self.attr("resource-id"));
        if self.is_focused() {
            element.focused = Some(true);
        }
        Some(element)
    }
}

fn bounds_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[(\d+),(\d+)\]\[(\d+),(\d+)\]$").expect("bounds pattern is valid")
    })
}

/// Parses a bounds string of the exact form `[left,top][right,bottom]`.
///
/// Returns `None` for anything else, including coordinates that overflow
/// `u32` and inverted corners.
pub fn parse_bounds(bounds: &str) -> Option<Rect> {
    let caps = bounds_pattern().captures(bounds)?;
    let coord = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
    Rect::from_corners(coord(1)?, coord(2)?, coord(3)?, coord(4)?)
}

/// Parses a UiAutomator dump into its root [`UiNode`] (the `<hierarchy>`
/// element).
///
/// Anything before the `<?xml` declaration and anything after the closing
/// `</hierarchy>` tag is ignored; `uiautomator dump /dev/tty` appends a
/// status line after the document.
pub fn parse_tree(dump: &str) -> Result<UiNode, HierarchyError> {
    let xml = dump.find("<?xml").map_or(dump, |start| &dump[start..]);
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<UiNode> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"hierarchy" => stack.push(UiNode::from_start(&e)?),
                b"node" if !stack.is_empty() => stack.push(UiNode::from_start(&e)?),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"hierarchy" if stack.is_empty() => return UiNode::from_start(&e),
                b"node" => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(UiNode::from_start(&e)?);
                    }
                }
                _ => {}
            },
            Event::End(e) if matches!(e.name().as_ref(), b"node" | b"hierarchy") => {
                if let Some(done) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => return Ok(done),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.is_empty() {
        Err(HierarchyError::MissingRoot("hierarchy"))
    } else {
        Err(HierarchyError::Truncated(stack.len()))
    }
}

/// Flattens a node tree into canonical elements.
///
/// Children are emitted before their ancestors. Nodes with no text,
/// content description or hint are skipped, as are nodes whose bounds do not
/// parse.
pub fn collect_elements(root: &UiNode) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut stack = vec![(root, false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            elements.extend(node.to_element());
            continue;
        }
        stack.push((node, true));
        for child in node.children.iter().rev() {
            stack.push((child, false));
        }
    }

    elements
}

/// Parses a dump and flattens it in one step.
pub fn parse_elements(dump: &str) -> Result<Vec<Element>, HierarchyError> {
    Ok(collect_elements(&parse_tree(dump)?))
}

/// Pre-order search returning the first node matching `predicate`.
fn find_first<'a>(root: &'a UiNode, predicate: impl Fn(&UiNode) -> bool) -> Option<&'a UiNode> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if predicate(node) {
            return Some(node);
        }
        stack.extend(node.children.iter().rev());
    }
    None
}

/// Finds the first node (depth-first) whose text, content description or
/// hint equals `label`.
pub fn find_by_label<'a>(root: &'a UiNode, label: &str) -> Option<&'a UiNode> {
    find_first(root, |node| node.has_label(label))
}

/// Finds the first node (depth-first) reported as focused.
pub fn find_focused(root: &UiNode) -> Option<&UiNode> {
    find_first(root, UiNode::is_focused)
}
