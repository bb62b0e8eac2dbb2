//! WSDL interpretation.
//!
//! Turns a service description into the operation catalog a client needs to
//! address the service, plus the schema hints the normalizer uses to type
//! scalars and keep single-item lists as lists.

use crate::error::{GatewayError, Result};
use crate::parser::{
    parse_document, split_qname, SoapVersion, XmlElement, WSDL_NS, WSDL_SOAP11_NS,
    WSDL_SOAP12_NS, XSD_NS,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How one operation is addressed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBinding {
    /// SOAPAction value (may be empty)
    pub soap_action: String,
    /// Local name of the request wrapper element
    pub input_element: String,
    /// Namespace of the request wrapper element
    pub input_namespace: String,
}

/// Scalar type of a simply-typed schema element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Boolean,
    Integer,
    /// Exact decimal, kept as its lexical text
    Decimal,
    /// Binary floating point
    Float,
    Text,
}

impl ScalarKind {
    /// Map an XML Schema built-in type (local name) to a kind.
    pub fn from_xsd_type(local: &str) -> Self {
        match local {
            "boolean" => Self::Boolean,
            "int" | "integer" | "long" | "short" | "byte" | "nonNegativeInteger"
            | "positiveInteger" | "nonPositiveInteger" | "negativeInteger" | "unsignedInt"
            | "unsignedLong" | "unsignedShort" | "unsignedByte" => Self::Integer,
            "decimal" => Self::Decimal,
            "float" | "double" => Self::Float,
            _ => Self::Text,
        }
    }
}

/// Schema-derived hints for response normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeHints {
    /// Element names declared with `maxOccurs` above one
    pub repeated: HashSet<String>,
    /// Scalar kinds of simply-typed elements
    pub scalars: HashMap<String, ScalarKind>,
    /// Element names only ever declared with complex content
    pub complex: HashSet<String>,
}

impl TypeHints {
    pub fn is_repeated(&self, name: &str) -> bool {
        self.repeated.contains(name)
    }

    pub fn scalar_kind(&self, name: &str) -> ScalarKind {
        self.scalars.get(name).copied().unwrap_or(ScalarKind::Text)
    }

    pub fn is_complex(&self, name: &str) -> bool {
        self.complex.contains(name)
    }
}

/// Everything learned from one service description.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    /// `definitions@targetNamespace`
    pub target_namespace: String,
    /// Whether schema children are namespace-qualified
    pub qualified: bool,
    /// SOAP version of the chosen port
    pub version: SoapVersion,
    /// Endpoint address of the chosen port
    pub address: String,
    /// Operations by name
    pub operations: HashMap<String, OperationBinding>,
    /// Normalization hints
    pub hints: TypeHints,
}

impl ServiceCatalog {
    pub fn operation(&self, name: &str) -> Option<&OperationBinding> {
        self.operations.get(name)
    }
}

/// Parse a WSDL 1.1 document.
pub fn parse_wsdl(data: &[u8]) -> Result<ServiceCatalog> {
    let root = parse_document(data)?;
    if root.name != "definitions" || root.namespace.as_deref() != Some(WSDL_NS) {
        return Err(malformed("root element is not wsdl:definitions"));
    }

    let target_namespace = root.attr("targetNamespace").unwrap_or_default().to_string();

    let schemas: Vec<&XmlElement> = root
        .children_named("types")
        .flat_map(|types| types.children_named("schema"))
        .filter(|s| s.namespace.as_deref() == Some(XSD_NS))
        .collect();

    let qualified = schemas
        .first()
        .and_then(|s| s.attr("elementFormDefault"))
        .map(|v| v == "qualified")
        .unwrap_or(false);
    let schema_namespace = schemas
        .first()
        .and_then(|s| s.attr("targetNamespace"))
        .unwrap_or(&target_namespace)
        .to_string();

    // message name -> (element local name, element namespace)
    let mut messages: HashMap<String, (String, String)> = HashMap::new();
    for message in wsdl_children(&root, "message") {
        let Some(name) = message.attr("name") else {
            continue;
        };
        let part = message
            .children_named("part")
            .find_map(|part| part.attr("element"));
        if let Some(element) = part {
            let (prefix, local) = split_qname(element);
            let namespace = resolve_qname_prefix(&root, prefix).unwrap_or(&schema_namespace);
            messages.insert(name.to_string(), (local.to_string(), namespace.to_string()));
        }
    }

    // operation name -> input message
    let mut inputs: HashMap<String, String> = HashMap::new();
    for port_type in wsdl_children(&root, "portType") {
        for operation in port_type.children_named("operation") {
            let Some(name) = operation.attr("name") else {
                continue;
            };
            if let Some(message) = operation.child("input").and_then(|i| i.attr("message")) {
                inputs.insert(name.to_string(), split_qname(message).1.to_string());
            }
        }
    }

    let (port_binding, version, address) = select_port(&root)?;

    let binding = wsdl_children(&root, "binding")
        .find(|b| b.attr("name") == Some(port_binding.as_str()))
        .ok_or_else(|| malformed(&format!("binding {:?} not found", port_binding)))?;

    let mut operations = HashMap::new();
    for operation in binding.children_named("operation") {
        let Some(name) = operation.attr("name") else {
            continue;
        };
        let soap_action = operation
            .children_named("operation")
            .find(|o| is_soap_binding_ns(o.namespace.as_deref()))
            .and_then(|o| o.attr("soapAction"))
            .unwrap_or_default()
            .to_string();

        let (input_element, input_namespace) = inputs
            .get(name)
            .and_then(|message| messages.get(message))
            .cloned()
            .unwrap_or_else(|| (name.to_string(), target_namespace.clone()));

        operations.insert(
            name.to_string(),
            OperationBinding {
                soap_action,
                input_element,
                input_namespace,
            },
        );
    }

    let hints = collect_hints(&schemas);

    debug!(
        target_namespace = %target_namespace,
        address = %address,
        version = ?version,
        operations = operations.len(),
        repeated_hints = hints.repeated.len(),
        "Service description parsed"
    );

    Ok(ServiceCatalog {
        target_namespace,
        qualified,
        version,
        address,
        operations,
        hints,
    })
}

fn wsdl_children<'a>(root: &'a XmlElement, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
    root.children_named(name)
        .filter(|c| c.namespace.as_deref() == Some(WSDL_NS))
}

fn is_soap_binding_ns(ns: Option<&str>) -> bool {
    matches!(ns, Some(WSDL_SOAP11_NS) | Some(WSDL_SOAP12_NS))
}

/// Pick the port to talk to, preferring SOAP 1.1.
fn select_port(root: &XmlElement) -> Result<(String, SoapVersion, String)> {
    let mut candidates = Vec::new();

    for service in wsdl_children(root, "service") {
        for port in service.children_named("port") {
            let Some(binding) = port.attr("binding") else {
                continue;
            };
            for address in port.children_named("address") {
                let version = match address.namespace.as_deref() {
                    Some(WSDL_SOAP11_NS) => SoapVersion::Soap11,
                    Some(WSDL_SOAP12_NS) => SoapVersion::Soap12,
                    _ => continue,
                };
                if let Some(location) = address.attr("location") {
                    candidates.push((
                        split_qname(binding).1.to_string(),
                        version,
                        location.to_string(),
                    ));
                }
            }
        }
    }

    let preferred = candidates
        .iter()
        .position(|(_, version, _)| *version == SoapVersion::Soap11)
        .unwrap_or(0);

    if candidates.is_empty() {
        return Err(malformed("no SOAP port with an address"));
    }
    Ok(candidates.swap_remove(preferred))
}

fn resolve_qname_prefix<'a>(root: &'a XmlElement, prefix: Option<&str>) -> Option<&'a str> {
    root.declared_namespace(prefix)
}

/// What a schema element declaration says about its content.
enum Content {
    Simple(ScalarKind),
    Complex,
    /// `xs:anyType` or no usable declaration
    Open,
}

impl Content {
    fn scalar_kind(&self) -> ScalarKind {
        match self {
            Content::Simple(kind) => *kind,
            Content::Complex | Content::Open => ScalarKind::Text,
        }
    }
}

fn declared_content(schema: &XmlElement, element: &XmlElement, simple_types: &HashSet<&str>) -> Content {
    let has_inline = |name: &str| {
        element
            .children_named(name)
            .any(|c| c.namespace.as_deref() == Some(XSD_NS))
    };

    match element.attr("type") {
        Some(ty) => {
            let (prefix, local) = split_qname(ty);
            let builtin = match prefix {
                Some(p) => schema_prefix_is_xsd(schema, p),
                None => false,
            };
            if builtin && local == "anyType" {
                Content::Open
            } else if builtin {
                Content::Simple(ScalarKind::from_xsd_type(local))
            } else if simple_types.contains(local) {
                Content::Simple(ScalarKind::Text)
            } else {
                Content::Complex
            }
        }
        None if has_inline("complexType") => Content::Complex,
        None if has_inline("simpleType") => Content::Simple(ScalarKind::Text),
        None => Content::Open,
    }
}

fn collect_hints(schemas: &[&XmlElement]) -> TypeHints {
    let mut hints = TypeHints::default();
    let mut conflicting: HashSet<String> = HashSet::new();
    let mut simple_names: HashSet<String> = HashSet::new();

    let simple_types: HashSet<&str> = schemas
        .iter()
        .flat_map(|schema| schema.descendants())
        .filter(|e| e.name == "simpleType" && e.namespace.as_deref() == Some(XSD_NS))
        .filter_map(|e| e.attr("name"))
        .collect();

    for schema in schemas {
        for element in schema.descendants() {
            if element.name != "element" || element.namespace.as_deref() != Some(XSD_NS) {
                continue;
            }
            let Some(name) = element.attr("name") else {
                continue;
            };

            if let Some(max) = element.attr("maxOccurs") {
                if max == "unbounded" || max.parse::<u64>().map(|n| n > 1).unwrap_or(false) {
                    hints.repeated.insert(name.to_string());
                }
            }

            let content = declared_content(schema, element, &simple_types);
            match content {
                Content::Complex => {
                    hints.complex.insert(name.to_string());
                }
                Content::Simple(_) => {
                    simple_names.insert(name.to_string());
                }
                Content::Open => {}
            }

            let kind = content.scalar_kind();
            if conflicting.contains(name) {
                continue;
            }
            match hints.scalars.get(name) {
                Some(existing) if *existing != kind => {
                    hints.scalars.remove(name);
                    conflicting.insert(name.to_string());
                }
                Some(_) => {}
                None if kind != ScalarKind::Text => {
                    hints.scalars.insert(name.to_string(), kind);
                }
                None => {
                    // Text-typed first sighting still blocks a later typed one.
                    conflicting.insert(name.to_string());
                }
            }
        }
    }

    // A name that is simple anywhere may legitimately be an empty string.
    hints.complex.retain(|name| !simple_names.contains(name));
    hints
}

fn schema_prefix_is_xsd(schema: &XmlElement, prefix: &str) -> bool {
    // Prefixes are usually declared on the schema element itself; the common
    // `xs`/`xsd` spellings are accepted when the declaration sits higher up.
    match schema.declared_namespace(Some(prefix)) {
        Some(ns) => ns == XSD_NS,
        None => matches!(prefix, "xs" | "xsd"),
    }
}

fn malformed(reason: &str) -> GatewayError {
    GatewayError::Transport(format!("malformed service description: {}", reason))
}
