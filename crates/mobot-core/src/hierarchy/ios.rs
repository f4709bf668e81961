//! WebDriverAgent page source parsing.
//!
//! `GET /source/?format=json` returns `{"value": node}` where every node has
//! a type, an optional label/name/value, a rect, a visibility flag and an
//! optional list of children. Only a small allow-list of interactive types
//! is surfaced to callers.

use serde::Deserialize;
use serde_json::Value;

use super::HierarchyError;
use crate::element::{non_empty, Element, Rect};

/// Node types that are retained as elements.
pub const ALLOWED_TYPES: &[&str] = &["TextField", "Button", "Switch", "Icon", "SearchField"];

/// Top-level page source document.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceTree {
    #[serde(default)]
    pub value: Option<SourceNode>,
}

/// A node in the WebDriverAgent accessibility tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub raw_identifier: Option<String>,
    pub rect: SourceRect,
    #[serde(default)]
    pub is_visible: Option<String>,
    #[serde(default)]
    children: Option<Vec<SourceNode>>,
}

/// Rect as reported by WebDriverAgent, in points and possibly fractional.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SourceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// Tears the tree down iteratively, whatever its depth.
impl Drop for SourceNode {
    fn drop(&mut self) {
        let mut pending = self.children.take().unwrap_or_default();
        while let Some(mut node) = pending.pop() {
            if let Some(children) = node.children.take() {
                pending.extend(children);
            }
        }
    }
}

impl SourceNode {
    /// Child nodes; absent and `null` children both read as empty.
    pub fn children(&self) -> &[SourceNode] {
        self.children.as_deref().unwrap_or_default()
    }

    fn is_retained(&self) -> bool {
        ALLOWED_TYPES.contains(&self.node_type.as_str())
            && self.is_visible.as_deref() == Some("1")
            && self.rect.x >= 0.0
            && self.rect.y >= 0.0
            && (self.label.is_some() || self.name.is_some())
    }

    fn to_element(&self) -> Element {
        // `as` truncates toward zero and saturates negatives and NaN to 0.
        let rect = Rect::new(
            self.rect.x as u32,
            self.rect.y as u32,
            self.rect.width as u32,
            self.rect.height as u32,
        );

        let mut element = Element::new(self.node_type.clone(), rect);
        element.label = self.label.clone();
        element.name = self.name.clone();
        element.value = self.value.as_ref().and_then(value_to_string);
        element.identifier = non_empty(self.raw_identifier.as_deref());
        element
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flattens a page source tree into canonical elements, parents before
/// children.
pub fn collect_elements(root: &SourceNode) -> Vec<Element> {
    let mut elements = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if node.is_retained() {
            elements.push(node.to_element());
        }
        stack.extend(node.children().iter().rev());
    }

    elements
}

/// Decodes a raw page source response.
///
/// Nesting depth is unbounded: serde_json's recursion limit is lifted and
/// `serde_stacker` grows the stack on demand while descending.
pub fn parse_tree(json: &[u8]) -> Result<SourceTree, HierarchyError> {
    let mut de = serde_json::Deserializer::from_slice(json);
    de.disable_recursion_limit();
    let tree = SourceTree::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(tree)
}

/// Decodes a raw page source response and flattens it.
pub fn parse_elements(json: &[u8]) -> Result<Vec<Element>, HierarchyError> {
    let tree = parse_tree(json)?;
    let Some(root) = tree.value.as_ref() else {
        return Err(HierarchyError::MissingRoot("value"));
    };
    Ok(collect_elements(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> Value {
        json!({
            "value": {
                "type": "Application",
                "name": "Settings",
                "isVisible": "1",
                "rect": { "x": 0, "y": 0, "width": 390, "height": 844 },
                "children": [
                    {
                        "type": "Button",
                        "label": "General",
                        "name": "General",
                        "rawIdentifier": "com.apple.settings.general",
                        "isVisible": "1",
                        "rect": { "x": 16.5, "y": 120.9, "width": 358.2, "height": 44.0 },
                        "children": [
                            {
                                "type": "Switch",
                                "label": "Airplane Mode",
                                "value": "0",
                                "isVisible": "1",
                                "rect": { "x": 300, "y": 130, "width": 51, "height": 31 }
                            }
                        ]
                    },
                    {
                        "type": "Button",
                        "label": "Offscreen",
                        "isVisible": "0",
                        "rect": { "x": 0, "y": 900, "width": 100, "height": 44 }
                    },
                    {
                        "type": "Button",
                        "label": "Negative",
                        "isVisible": "1",
                        "rect": { "x": -20, "y": 10, "width": 100, "height": 44 }
                    },
                    {
                        "type": "StaticText",
                        "label": "Not interactive",
                        "isVisible": "1",
                        "rect": { "x": 10, "y": 10, "width": 100, "height": 20 }
                    },
                    {
                        "type": "SearchField",
                        "name": "Search",
                        "value": null,
                        "isVisible": "1",
                        "rect": { "x": 16, "y": 60, "width": 358, "height": 36 },
                        "children": null
                    },
                    {
                        "type": "Icon",
                        "isVisible": "1",
                        "rect": { "x": 16, "y": 60, "width": 60, "height": 60 }
                    }
                ]
            }
        })
    }

    fn parse(value: &Value) -> Vec<Element> {
        parse_elements(&serde_json::to_vec(value).unwrap()).unwrap()
    }

    #[test]
    fn applies_allow_list_and_visibility_filters() {
        let elements = parse(&page());
        let labels: Vec<_> = elements
            .iter()
            .map(|e| e.label.clone().or_else(|| e.name.clone()).unwrap())
            .collect();
        assert_eq!(labels, ["General", "Airplane Mode", "Search"]);
    }

    #[test]
    fn parents_precede_children() {
        let elements = parse(&page());
        assert_eq!(elements[0].element_type, "Button");
        assert_eq!(elements[1].element_type, "Switch");
    }

    #[test]
    fn truncates_fractional_coordinates() {
        let elements = parse(&page());
        assert_eq!(elements[0].rect, Rect::new(16, 120, 358, 44));
    }

    #[test]
    fn maps_identifier_and_value() {
        let elements = parse(&page());
        assert_eq!(elements[0].identifier.as_deref(), Some("com.apple.settings.general"));
        assert_eq!(elements[1].value.as_deref(), Some("0"));
        assert_eq!(elements[2].value, None);
        assert_eq!(elements[0].focused, None);
    }

    #[test]
    fn numeric_values_are_stringified() {
        let doc = json!({
            "value": {
                "type": "Switch",
                "label": "Wi-Fi",
                "value": 1,
                "isVisible": "1",
                "rect": { "x": 0, "y": 0, "width": 10, "height": 10 }
            }
        });
        assert_eq!(parse(&doc)[0].value.as_deref(), Some("1"));
    }

    #[test]
    fn missing_value_root_is_an_error() {
        let result = parse_elements(br#"{"sessionId": "abc"}"#);
        assert!(matches!(result, Err(HierarchyError::MissingRoot("value"))));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(parse_elements(b"not json"), Err(HierarchyError::Json(_))));
        assert!(matches!(
            parse_elements(br#"{"value": {"type": "Button"}}"#),
            Err(HierarchyError::Json(_))
        ));
    }

    /// A Button under `depth` "Other" containers, built as text so the
    /// fixture itself never recurses.
    fn nested_source(depth: usize) -> String {
        let container = r#"{"type":"Other","isVisible":"1","rect":{"x":0,"y":0,"width":10,"height":10},"children":["#;
        let leaf = r#"{"type":"Button","label":"Deep","isVisible":"1","rect":{"x":1,"y":1,"width":5,"height":5}}"#;
        let mut doc = String::from(r#"{"value":"#);
        for _ in 0..depth {
            doc.push_str(container);
        }
        doc.push_str(leaf);
        for _ in 0..depth {
            doc.push_str("]}");
        }
        doc.push('}');
        doc
    }

    #[test]
    fn very_deep_trees_parse_without_a_depth_limit() {
        for depth in [62, 63, 64, 500, 5_000] {
            let elements = parse_elements(nested_source(depth).as_bytes()).unwrap();
            assert_eq!(elements.len(), 1, "depth {depth}");
            assert_eq!(elements[0].label.as_deref(), Some("Deep"));
        }
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let doc = format!("{} trailing", nested_source(1));
        assert!(matches!(parse_elements(doc.as_bytes()), Err(HierarchyError::Json(_))));
    }

    #[test]
    fn deep_nesting_is_supported() {
        let mut node = json!({
            "type": "Button",
            "label": "Deep",
            "isVisible": "1",
            "rect": { "x": 1, "y": 1, "width": 5, "height": 5 }
        });
        for _ in 0..100 {
            node = json!({
                "type": "Other",
                "isVisible": "1",
                "rect": { "x": 0, "y": 0, "width": 10, "height": 10 },
                "children": [node]
            });
        }
        let elements = parse(&json!({ "value": node }));
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].label.as_deref(), Some("Deep"));
    }
}
