//! Response normalization.
//!
//! Converts the raw XML result of an operation into a [`Node`] tree that
//! serializes directly to JSON. The conversion is total: any element shape
//! produces a node.

use crate::parser::{XmlElement, XSD_NS};
use crate::registry::ListShaping;
use crate::wsdl::{ScalarKind, TypeHints};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Key holding element text when an element also carries fields.
pub const TEXT_KEY: &str = "_value";

/// A scalar leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    Text(String),
}

/// Normalized response tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Null,
    Scalar(Scalar),
    Sequence(Vec<Node>),
    Mapping(BTreeMap<String, Node>),
}

impl Node {
    /// The explicit "no results" value.
    pub fn empty() -> Self {
        Node::Mapping(BTreeMap::new())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::Text(s.into()))
    }

    /// Field of a mapping.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Mapping(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Loose truthiness used by list filters.
    pub fn is_truthy(&self) -> bool {
        match self {
            Node::Null => false,
            Node::Scalar(Scalar::Bool(b)) => *b,
            Node::Scalar(Scalar::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Node::Scalar(Scalar::Text(s)) => matches!(s.trim(), "true" | "1"),
            Node::Sequence(items) => !items.is_empty(),
            Node::Mapping(fields) => !fields.is_empty(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Node::Null => Value::Null,
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Node::Scalar(Scalar::Number(n)) => Value::Number(n.clone()),
            Node::Scalar(Scalar::Text(s)) => Value::String(s.clone()),
            Node::Sequence(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Mapping(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Scalar(Scalar::Bool(*b)),
            Value::Number(n) => Node::Scalar(Scalar::Number(n.clone())),
            Value::String(s) => Node::text(s.clone()),
            Value::Array(items) => Node::Sequence(items.iter().map(Node::from).collect()),
            Value::Object(fields) => Node::Mapping(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Node::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Normalize an operation result.
///
/// `None`, a nil result and an empty result element all become [`Node::empty`].
pub fn normalize_response(raw: Option<&XmlElement>, hints: &TypeHints) -> Node {
    match raw {
        None => Node::empty(),
        Some(el) if is_empty_leaf(el) => Node::empty(),
        Some(el) => match normalize_element(el, hints) {
            Node::Null => Node::empty(),
            node => node,
        },
    }
}

fn is_empty_leaf(el: &XmlElement) -> bool {
    el.is_leaf() && el.data_attributes().next().is_none() && el.text().trim().is_empty()
}

/// Normalize one element and everything under it.
pub fn normalize_element(el: &XmlElement, hints: &TypeHints) -> Node {
    if el.is_nil() {
        return Node::Null;
    }

    let mut fields: BTreeMap<String, Node> = el
        .data_attributes()
        .map(|a| (a.name.clone(), Node::text(a.value.clone())))
        .collect();

    if el.is_leaf() {
        if fields.is_empty() {
            return leaf_scalar(el, hints);
        }
        if let Some(text) = &el.text {
            fields.insert(TEXT_KEY.to_string(), Node::text(text.clone()));
        }
        return Node::Mapping(fields);
    }

    // Group children by name, keeping first-seen order for sequences.
    let mut groups: Vec<(&str, Vec<&XmlElement>)> = Vec::new();
    for child in &el.children {
        match groups.iter_mut().find(|(name, _)| *name == child.name) {
            Some((_, members)) => members.push(child),
            None => groups.push((child.name.as_str(), vec![child])),
        }
    }

    for (name, members) in groups {
        let node = if members.len() > 1 || hints.is_repeated(name) {
            Node::Sequence(members.iter().map(|m| normalize_element(m, hints)).collect())
        } else {
            normalize_element(members[0], hints)
        };
        fields.insert(name.to_string(), node);
    }

    if let Some(text) = &el.text {
        fields
            .entry(TEXT_KEY.to_string())
            .or_insert_with(|| Node::text(text.clone()));
    }

    Node::Mapping(fields)
}

fn leaf_scalar(el: &XmlElement, hints: &TypeHints) -> Node {
    let declared = el
        .xsi_attr("type")
        .and_then(|ty| {
            let (prefix, local) = crate::parser::split_qname(ty);
            // Only built-in schema types carry a scalar meaning.
            let builtin = match prefix {
                Some(p) => matches!(p, "xs" | "xsd") || el.declared_namespace(Some(p)) == Some(XSD_NS),
                None => false,
            };
            builtin.then(|| ScalarKind::from_xsd_type(local))
        });

    // An empty element of a complex type is an object with no fields.
    if el.text.is_none() && declared.is_none() && hints.is_complex(&el.name) {
        return Node::empty();
    }
    let kind = declared.unwrap_or_else(|| hints.scalar_kind(&el.name));

    let text = match &el.text {
        Some(text) => text.as_str(),
        None if kind == ScalarKind::Text => return Node::text(""),
        None => return Node::Null,
    };

    let typed = match kind {
        ScalarKind::Boolean => match text.trim() {
            "true" | "1" => Some(Scalar::Bool(true)),
            "false" | "0" => Some(Scalar::Bool(false)),
            _ => None,
        },
        ScalarKind::Integer => text.trim().parse::<i64>().ok().map(|i| Scalar::Number(i.into())),
        ScalarKind::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Scalar::Number),
        ScalarKind::Decimal | ScalarKind::Text => None,
    };

    Node::Scalar(typed.unwrap_or_else(|| Scalar::Text(text.to_string())))
}

/// Flatten a normalized result into list items.
fn list_items(node: Node) -> Vec<Node> {
    match node {
        Node::Null => Vec::new(),
        Node::Sequence(items) => items,
        Node::Mapping(mut fields) if fields.len() == 1 => {
            let (_, only) = fields.pop_first().unwrap_or((String::new(), Node::Null));
            match only {
                Node::Sequence(items) => items,
                Node::Mapping(inner) => vec![Node::Mapping(inner)],
                Node::Null => Vec::new(),
                other => vec![other],
            }
        }
        Node::Mapping(fields) if fields.is_empty() => Vec::new(),
        other => vec![other],
    }
}

/// Apply a route's list shaping to a normalized result.
///
/// `params` are the request parameters, used for echoed fields.
pub fn shape_list(node: Node, shaping: &ListShaping, params: &Map<String, Value>) -> Node {
    let items = list_items(node)
        .into_iter()
        // Projection needs fields; anything else would become a row of nulls.
        .filter(|item| {
            shaping.fields.is_empty() || matches!(item, Node::Mapping(fields) if !fields.is_empty())
        })
        .filter(|item| match &shaping.filter {
            Some(flag) => item.get(flag).map(Node::is_truthy).unwrap_or(false),
            None => true,
        })
        .map(|item| {
            if shaping.fields.is_empty() {
                return item;
            }
            let projected = shaping
                .fields
                .iter()
                .map(|f| (f.target.clone(), item.get(&f.source).cloned().unwrap_or(Node::Null)))
                .collect();
            Node::Mapping(projected)
        })
        .collect();

    let mut out = BTreeMap::new();
    out.insert(shaping.key.clone(), Node::Sequence(items));
    for echo in &shaping.echo {
        let value = params.get(&echo.source).map(Node::from).unwrap_or(Node::Null);
        out.insert(echo.target.clone(), value);
    }
    Node::Mapping(out)
}
