//! XML parsing utilities.
//!
//! Builds a small namespace-resolved element tree with quick-xml, which does
//! not expand external entities. Documents declaring a DOCTYPE or entities are
//! rejected up front.

use crate::error::{GatewayError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// SOAP envelope namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// XML Schema namespaces.
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// WSDL 1.1 namespaces.
pub const WSDL_NS: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const WSDL_SOAP11_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
pub const WSDL_SOAP12_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// SOAP protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    Soap12,
}

impl SoapVersion {
    pub fn envelope_namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    pub fn from_envelope_namespace(ns: &str) -> Option<Self> {
        match ns {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }
}

/// An attribute with its prefix resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    /// Local name
    pub name: String,
    /// Namespace URI (unprefixed attributes have none)
    pub namespace: Option<String>,
    /// Unescaped value
    pub value: String,
}

/// A parsed element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Local name
    pub name: String,
    /// Resolved namespace URI
    pub namespace: Option<String>,
    /// Attributes other than namespace declarations
    pub attributes: Vec<XmlAttribute>,
    /// Namespace declarations made on this element (`None` prefix = default)
    pub declarations: Vec<(Option<String>, String)>,
    /// Concatenated text and CDATA content
    pub text: Option<String>,
    /// Child elements in document order
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_attribute(
        mut self,
        namespace: Option<&str>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.push(XmlAttribute {
            name: name.into(),
            namespace: namespace.map(String::from),
            value: value.into(),
        });
        self
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Value of an attribute by local name, ignoring its namespace.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Value of an attribute in the XML Schema instance namespace.
    pub fn xsi_attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.namespace.as_deref() == Some(XSI_NS))
            .map(|a| a.value.as_str())
    }

    /// `xsi:nil="true"` marker.
    pub fn is_nil(&self) -> bool {
        matches!(self.xsi_attr("nil"), Some("true") | Some("1"))
    }

    /// Attributes that carry data rather than schema instance markup.
    pub fn data_attributes(&self) -> impl Iterator<Item = &XmlAttribute> {
        self.attributes
            .iter()
            .filter(|a| a.namespace.as_deref() != Some(XSI_NS))
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Namespace bound to `prefix` by a declaration on this element.
    pub fn declared_namespace(&self, prefix: Option<&str>) -> Option<&str> {
        self.declarations
            .iter()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// All descendants, depth first, excluding `self`.
    pub fn descendants(&self) -> Vec<&XmlElement> {
        let mut out = Vec::new();
        let mut stack: Vec<&XmlElement> = self.children.iter().rev().collect();
        while let Some(el) = stack.pop() {
            out.push(el);
            stack.extend(el.children.iter().rev());
        }
        out
    }
}

/// Parse a whole document and return its root element.
pub fn parse_document(data: &[u8]) -> Result<XmlElement> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| GatewayError::InvalidXml(format!("Invalid UTF-8: {}", e)))?;

    check_xxe_patterns(xml_str)?;

    // Whitespace inside values is data; whitespace-only runs are dropped below.
    let mut reader = Reader::from_str(xml_str);
    reader.config_mut().trim_text(false);

    let mut scopes: Vec<Vec<(Option<String>, String)>> = Vec::new();
    let mut open: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let element = start_element(e, &mut scopes)?;
                open.push(element);
            }

            Ok(Event::Empty(ref e)) => {
                let element = start_element(e, &mut scopes)?;
                scopes.pop();
                attach(element, &mut open, &mut root)?;
            }

            Ok(Event::End(_)) => {
                scopes.pop();
                let element = open.pop().ok_or_else(|| {
                    GatewayError::InvalidXml("unexpected closing tag".to_string())
                })?;
                attach(element, &mut open, &mut root)?;
            }

            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| GatewayError::InvalidXml(format!("XML text error: {}", e)))?;
                if let Some(current) = open.last_mut().filter(|_| !text.trim().is_empty()) {
                    push_text(current, &text);
                }
            }

            Ok(Event::CData(ref e)) => {
                let text = std::str::from_utf8(e)
                    .map_err(|e| GatewayError::InvalidXml(format!("Invalid UTF-8 in CDATA: {}", e)))?;
                if let Some(current) = open.last_mut() {
                    push_text(current, text);
                }
            }

            Ok(Event::Eof) => break,

            Err(e) => {
                return Err(GatewayError::InvalidXml(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }

            _ => {}
        }

        buf.clear();
    }

    if !open.is_empty() {
        return Err(GatewayError::InvalidXml(format!(
            "unclosed element <{}>",
            open.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }

    root.ok_or_else(|| GatewayError::InvalidXml("document has no root element".to_string()))
}

/// Reject DOCTYPE and entity declarations.
fn check_xxe_patterns(xml: &str) -> Result<()> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(GatewayError::InvalidXml(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(GatewayError::InvalidXml(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

fn start_element(
    e: &BytesStart,
    scopes: &mut Vec<Vec<(Option<String>, String)>>,
) -> Result<XmlElement> {
    let mut declarations = Vec::new();
    let mut raw_attributes = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| GatewayError::InvalidXml(format!("XML attribute error: {}", e)))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| GatewayError::InvalidXml(format!("XML attribute error: {}", e)))?
            .into_owned();

        if key == "xmlns" {
            declarations.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((Some(prefix.to_string()), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    scopes.push(declarations.clone());

    let qname = utf8(e.name().as_ref())?.to_string();
    let (prefix, local) = split_qname(&qname);
    let namespace = resolve_prefix(scopes, prefix);
    if prefix.is_some() && namespace.is_none() {
        return Err(GatewayError::InvalidXml(format!(
            "undeclared namespace prefix in <{}>",
            qname
        )));
    }

    let attributes = raw_attributes
        .into_iter()
        .map(|(key, value)| {
            let (prefix, local) = split_qname(&key);
            XmlAttribute {
                name: local.to_string(),
                namespace: prefix.and_then(|p| resolve_prefix(scopes, Some(p))),
                value,
            }
        })
        .collect();

    Ok(XmlElement {
        name: local.to_string(),
        namespace,
        attributes,
        declarations,
        text: None,
        children: Vec::new(),
    })
}

fn attach(
    element: XmlElement,
    open: &mut [XmlElement],
    root: &mut Option<XmlElement>,
) -> Result<()> {
    match open.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(GatewayError::InvalidXml(
                "document has more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn push_text(element: &mut XmlElement, text: &str) {
    match element.text {
        Some(ref mut existing) => existing.push_str(text),
        None => element.text = Some(text.to_string()),
    }
}

fn resolve_prefix(scopes: &[Vec<(Option<String>, String)>], prefix: Option<&str>) -> Option<String> {
    if prefix == Some("xml") {
        return Some(XML_NS.to_string());
    }
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter())
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.clone())
        .filter(|uri| !uri.is_empty())
}

/// Split `prefix:local` into its parts.
pub fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| GatewayError::InvalidXml(format!("Invalid UTF-8: {}", e)))
}

/// Escape text or attribute content.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Whether `name` can be used as an element name.
pub fn is_valid_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != "xmlns" && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_11_SAMPLE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:GetBusStopsResponse xmlns:m="http://www.unistation.ru/xdto">
      <m:return xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
        <m:Elements>
          <m:Id>862fd93e-e633-11e7-80e7-00175d776a07</m:Id>
          <m:Name>Moscow &amp; Region</m:Name>
          <m:Comment xsi:nil="true"/>
        </m:Elements>
      </m:return>
    </m:GetBusStopsResponse>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_tree() {
        let root = parse_document(SOAP_11_SAMPLE.as_bytes()).unwrap();
        assert_eq!(root.name, "Envelope");
        assert_eq!(root.namespace.as_deref(), Some(SOAP_11_NS));

        let body = root.child("Body").unwrap();
        let response = &body.children[0];
        assert_eq!(response.name, "GetBusStopsResponse");
        assert_eq!(response.namespace.as_deref(), Some("http://www.unistation.ru/xdto"));

        let elements = response.child("return").unwrap().child("Elements").unwrap();
        assert_eq!(elements.child("Name").unwrap().text(), "Moscow & Region");
        assert!(elements.child("Comment").unwrap().is_nil());
        assert!(!elements.child("Id").unwrap().is_nil());
    }

    #[test]
    fn test_default_namespace_and_declarations() {
        let xml = r#"<a xmlns="urn:x" xmlns:y="urn:y"><b y:flag="1">t</b><y:c/></a>"#;
        let root = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(root.namespace.as_deref(), Some("urn:x"));
        assert_eq!(root.declared_namespace(Some("y")), Some("urn:y"));
        assert_eq!(root.declared_namespace(None), Some("urn:x"));

        let b = root.child("b").unwrap();
        assert_eq!(b.namespace.as_deref(), Some("urn:x"));
        assert_eq!(b.attributes[0].namespace.as_deref(), Some("urn:y"));
        assert_eq!(b.attr("flag"), Some("1"));
        assert_eq!(root.child("c").unwrap().namespace.as_deref(), Some("urn:y"));
    }

    #[test]
    fn test_cdata_is_text() {
        let root = parse_document(b"<a><![CDATA[<raw>]]></a>").unwrap();
        assert_eq!(root.text(), "<raw>");
    }

    #[test]
    fn test_descendants_order() {
        let root = parse_document(b"<a><b><c/></b><d/></a>").unwrap();
        let names: Vec<_> = root.descendants().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_xxe_detection() {
        let xxe_payload = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>&xxe;</soap:Body>
</soap:Envelope>"#;

        let err = parse_document(xxe_payload.as_bytes()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidXml(_)));
        assert!(err.to_string().contains("DOCTYPE"));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_document(b"<a><b></a>").is_err());
        assert!(parse_document(b"<a>").is_err());
        assert!(parse_document(b"").is_err());
        assert!(parse_document(b"<p:a/>").is_err());
        assert!(parse_document(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname("tns:GetTrips"), (Some("tns"), "GetTrips"));
        assert_eq!(split_qname("GetTrips"), (None, "GetTrips"));
    }

    #[test]
    fn test_element_names() {
        assert!(is_valid_element_name("OrderId"));
        assert!(is_valid_element_name("Ticket_Seat-1.x"));
        assert!(is_valid_element_name("ФИО"));
        assert!(!is_valid_element_name(""));
        assert!(!is_valid_element_name("1abc"));
        assert!(!is_valid_element_name("a b"));
        assert!(!is_valid_element_name("<x>"));
        assert!(!is_valid_element_name("xmlns"));
        assert!(is_valid_element_name("XmlPayload"));
        assert!(is_valid_element_name("xmlData"));
    }

    #[test]
    fn test_text_whitespace_is_preserved() {
        let xml = "<a>\n  <b>  padded value </b>\n  <c>\t</c>\n</a>";
        let root = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(root.text, None);
        assert_eq!(root.child("b").unwrap().text(), "  padded value ");
        assert_eq!(root.child("c").unwrap().text, None);
    }

    #[test]
    fn test_soap_version_namespaces() {
        assert_eq!(SoapVersion::from_envelope_namespace(SOAP_12_NS), Some(SoapVersion::Soap12));
        assert_eq!(SoapVersion::Soap11.envelope_namespace(), SOAP_11_NS);
        assert_eq!(SoapVersion::from_envelope_namespace("urn:other"), None);
    }
}
