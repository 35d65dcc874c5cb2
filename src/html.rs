//! Element tree decoding and HTML serialization.
//!
//! The sandbox hands back a JSON value built by the `h()` helper: a text
//! leaf (string or number), an element object `{tag, attrs, children}`, a
//! fragment (`tag: null`, or a bare array), or a conditional-rendering hole
//! (`null`/`false`/`true`, which render nothing). Anything outside that shape
//! is an error, never a silent drop.
//!
//! Serialization walks the tree depth-first, pre-order. Text and attribute
//! values are entity-escaped; boolean `true` attributes emit a bare name and
//! `false` attributes are omitted; void elements take no closing tag and
//! reject children.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

/// Tags with no legal children, emitted without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "param", "source", "track", "wbr",
];

/// A rendered element tree node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Element {
        tag: String,
        /// Attribute name to value; `None` emits a bare attribute name.
        attrs: Vec<(String, Option<String>)>,
        children: Vec<Node>,
    },
    Fragment(Vec<Node>),
}

/// Decode the sandbox's JSON tree into [`Node`]s.
pub(crate) fn decode(value: &Value) -> Result<Node> {
    match value {
        Value::String(text) => Ok(Node::Text(text.clone())),
        Value::Number(n) => Ok(Node::Text(n.to_string())),
        // Conditional rendering: `cond && h(...)` yields false/null for the
        // untaken branch. These carry no content. Non-data values (functions,
        // undefined, symbols) never reach this decoder: the sandbox rejects
        // them during serialization instead of laundering them to null.
        Value::Null | Value::Bool(_) => Ok(Node::Fragment(Vec::new())),
        Value::Array(items) => {
            let children = items.iter().map(decode).collect::<Result<Vec<_>>>()?;
            Ok(Node::Fragment(children))
        }
        Value::Object(map) => {
            let tag = map
                .get("tag")
                .ok_or_else(|| anyhow!("node object has no `tag` field"))?;

            let children = match map.get("children") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => {
                    items.iter().map(decode).collect::<Result<Vec<_>>>()?
                }
                Some(other) => bail!("`children` must be an array, got {other}"),
            };

            match tag {
                Value::Null => Ok(Node::Fragment(children)),
                Value::String(tag) => Ok(Node::Element {
                    tag: tag.clone(),
                    attrs: decode_attrs(map.get("attrs"), tag)?,
                    children,
                }),
                other => bail!("`tag` must be a string or null, got {other}"),
            }
        }
    }
}

fn decode_attrs(attrs: Option<&Value>, tag: &str) -> Result<Vec<(String, Option<String>)>> {
    let map = match attrs {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(other) => bail!("attributes of <{tag}> must be a mapping, got {other}"),
    };

    let mut decoded = Vec::with_capacity(map.len());
    for (name, value) in map {
        match value {
            Value::String(s) => decoded.push((name.clone(), Some(s.clone()))),
            Value::Number(n) => decoded.push((name.clone(), Some(n.to_string()))),
            Value::Bool(true) => decoded.push((name.clone(), None)),
            // Absent attribute
            Value::Bool(false) | Value::Null => {}
            other => bail!("attribute `{name}` of <{tag}> has unsupported value {other}"),
        }
    }
    Ok(decoded)
}

/// Serialize a tree to an HTML string.
pub(crate) fn serialize(node: &Node) -> Result<String> {
    let mut out = String::new();
    write_node(node, &mut out)?;
    Ok(out)
}

fn write_node(node: &Node, out: &mut String) -> Result<()> {
    match node {
        Node::Text(text) => escape_into(text, out),
        Node::Fragment(children) => {
            for child in children {
                write_node(child, out)?;
            }
        }
        Node::Element {
            tag,
            attrs,
            children,
        } => {
            if !is_valid_tag(tag) {
                bail!("invalid tag name `{tag}`");
            }

            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                if !is_valid_attr_name(name) {
                    bail!("invalid attribute name `{name}` on <{tag}>");
                }
                out.push(' ');
                out.push_str(name);
                if let Some(value) = value {
                    out.push_str("=\"");
                    escape_into(value, out);
                    out.push('"');
                }
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&tag.as_str()) {
                if !children.is_empty() {
                    bail!("void element <{tag}> cannot have children");
                }
            } else {
                for child in children {
                    write_node(child, out)?;
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
    Ok(())
}

/// Entity-escape for both text content and attribute values.
fn escape_into(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
}

/// Tag names come from module code, not props, but a malformed name would
/// still break out of the tag position. Restrict to the HTML custom-element
/// character set.
fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_valid_attr_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}
