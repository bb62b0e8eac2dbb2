//! SOAP envelope encoding and decoding.

use crate::error::{GatewayError, Result};
use crate::parser::{
    is_valid_element_name, parse_document, xml_escape, SoapVersion, XmlElement,
};
use crate::wsdl::{OperationBinding, ServiceCatalog};
use serde_json::{Map, Value};

/// An operation name plus its named parameters, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub operation: String,
    pub params: Map<String, Value>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Content-Type and optional SOAPAction header for a request.
pub fn request_headers(version: SoapVersion, soap_action: &str) -> (String, Option<String>) {
    match version {
        SoapVersion::Soap11 => (
            "text/xml; charset=utf-8".to_string(),
            Some(format!("\"{}\"", soap_action)),
        ),
        SoapVersion::Soap12 if soap_action.is_empty() => {
            ("application/soap+xml; charset=utf-8".to_string(), None)
        }
        SoapVersion::Soap12 => (
            format!("application/soap+xml; charset=utf-8; action=\"{}\"", soap_action),
            None,
        ),
    }
}

/// Build the request envelope for `request`.
pub fn build_request(
    catalog: &ServiceCatalog,
    binding: &OperationBinding,
    request: &OperationRequest,
) -> Result<String> {
    let mut body = String::new();
    let wrapper = &binding.input_element;

    // Qualified schemas: a default namespace makes every parameter inherit it.
    // Otherwise only the wrapper is namespaced.
    let namespace = xml_escape(&binding.input_namespace);
    let (open_tag, close_tag) = if catalog.qualified {
        (
            format!("<{} xmlns=\"{}\">", wrapper, namespace),
            format!("</{}>", wrapper),
        )
    } else {
        (
            format!("<ns0:{} xmlns:ns0=\"{}\">", wrapper, namespace),
            format!("</ns0:{}>", wrapper),
        )
    };

    body.push_str(&open_tag);
    for (name, value) in &request.params {
        write_value(&mut body, name, value)?;
    }
    body.push_str(&close_tag);

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap-env:Envelope xmlns:soap-env="{}"><soap-env:Body>{}</soap-env:Body></soap-env:Envelope>"#,
        catalog.version.envelope_namespace(),
        body
    ))
}

fn write_value(out: &mut String, name: &str, value: &Value) -> Result<()> {
    if !is_valid_element_name(name) {
        return Err(GatewayError::Decoding(format!(
            "parameter name {:?} is not a valid element name",
            name
        )));
    }

    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                write_value(out, name, item)?;
            }
        }
        Value::Object(fields) => {
            out.push_str(&format!("<{}>", name));
            for (field, inner) in fields {
                write_value(out, field, inner)?;
            }
            out.push_str(&format!("</{}>", name));
        }
        Value::String(s) => {
            out.push_str(&format!("<{0}>{1}</{0}>", name, xml_escape(s)));
        }
        Value::Bool(_) | Value::Number(_) => {
            out.push_str(&format!("<{0}>{1}</{0}>", name, value));
        }
    }
    Ok(())
}

/// Decode a response envelope.
///
/// Returns the operation result, `None` when the response wrapper is empty.
/// A Fault body becomes [`GatewayError::RemoteFault`].
pub fn parse_response(data: &[u8]) -> Result<Option<XmlElement>> {
    let root = parse_document(data)?;

    let version = match root.namespace.as_deref() {
        Some(ns) if root.name == "Envelope" => SoapVersion::from_envelope_namespace(ns),
        _ => None,
    }
    .ok_or_else(|| {
        GatewayError::InvalidXml("No valid SOAP Envelope found with recognized namespace".to_string())
    })?;

    let mut root = root;
    let body_index = root
        .children
        .iter()
        .position(|c| c.name == "Body")
        .ok_or_else(|| GatewayError::InvalidXml("SOAP Envelope has no Body".to_string()))?;
    let mut body = root.children.swap_remove(body_index);

    if body.children.is_empty() {
        return Ok(None);
    }
    let mut wrapper = body.children.swap_remove(0);

    if wrapper.name == "Fault" && wrapper.namespace.as_deref() == Some(version.envelope_namespace()) {
        return Err(fault_error(version, &wrapper));
    }

    match wrapper.children.len() {
        0 => Ok(None),
        1 => Ok(wrapper.children.pop()),
        _ => Ok(Some(wrapper)),
    }
}

/// Whether the document is a SOAP Fault, without failing on garbage.
pub fn fault_in(data: &[u8]) -> Option<GatewayError> {
    match parse_response(data) {
        Err(err @ GatewayError::RemoteFault { .. }) => Some(err),
        _ => None,
    }
}

fn fault_error(version: SoapVersion, fault: &XmlElement) -> GatewayError {
    let (code, message) = match version {
        SoapVersion::Soap11 => (
            fault.child("faultcode").map(|c| c.text().to_string()),
            fault.child("faultstring").map(|c| c.text().to_string()),
        ),
        SoapVersion::Soap12 => (
            fault
                .child("Code")
                .and_then(|c| c.child("Value"))
                .map(|v| v.text().to_string()),
            fault
                .child("Reason")
                .and_then(|r| r.child("Text"))
                .map(|t| t.text().to_string()),
        ),
    };

    GatewayError::RemoteFault {
        code: code.unwrap_or_else(|| "unknown".to_string()),
        message: message.unwrap_or_else(|| "remote service returned a fault".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsdl::{parse_wsdl, tests::sample_wsdl};
    use serde_json::json;

    fn catalog() -> ServiceCatalog {
        parse_wsdl(sample_wsdl("http://localhost/ws/SalePort").as_bytes()).unwrap()
    }

    #[test]
    fn test_build_request_qualified() {
        let catalog = catalog();
        let binding = catalog.operation("GetTrips").unwrap();
        let request = OperationRequest::new("GetTrips")
            .param("Departure", "862fd93e-e633-11e7-80e7-00175d776a07")
            .param("Destination", "cb654d84-f487-11ed-83c7-d00da3a6c886")
            .param("TripsDate", "2023-06-10");

        let xml = build_request(&catalog, binding, &request).unwrap();
        assert!(xml.contains(r#"xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/""#));
        assert!(xml.contains(r#"<GetTrips xmlns="http://www.unistation.ru/saleport">"#));

        let departure = xml.find("<Departure>").unwrap();
        let destination = xml.find("<Destination>").unwrap();
        let date = xml.find("<TripsDate>2023-06-10</TripsDate>").unwrap();
        assert!(departure < destination && destination < date);

        // The envelope parses back into the same parameter set.
        let root = parse_document(xml.as_bytes()).unwrap();
        let wrapper = &root.child("Body").unwrap().children[0];
        assert_eq!(wrapper.namespace.as_deref(), Some("http://www.unistation.ru/saleport"));
        assert_eq!(wrapper.children.len(), 3);
        assert_eq!(
            wrapper.children[0].namespace.as_deref(),
            Some("http://www.unistation.ru/saleport")
        );
    }

    #[test]
    fn test_build_request_nested_and_repeated() {
        let catalog = catalog();
        let binding = catalog.operation("AddTickets").unwrap();
        let request = OperationRequest::new("AddTickets")
            .param("OrderId", "00000026685")
            .param(
                "TicketSeats",
                json!({"Elements": [
                    {"FareName": "Пассажирский", "SeatNum": "0", "ParentTicketSeatNum": "0"},
                    {"FareName": "Багажный", "SeatNum": 0, "ParentTicketSeatNum": "1", "Note": null}
                ]}),
            );

        let xml = build_request(&catalog, binding, &request).unwrap();
        let root = parse_document(xml.as_bytes()).unwrap();
        let wrapper = &root.child("Body").unwrap().children[0];
        let seats = wrapper.child("TicketSeats").unwrap();
        let elements: Vec<_> = seats.children_named("Elements").collect();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].child("FareName").unwrap().text(), "Пассажирский");
        assert_eq!(elements[1].child("SeatNum").unwrap().text(), "0");
        assert!(elements[1].child("Note").is_none());
    }

    #[test]
    fn test_build_request_escapes_text() {
        let catalog = catalog();
        let binding = catalog.operation("GetTrips").unwrap();
        let request = OperationRequest::new("GetTrips").param("Departure", "<a & b>");
        let xml = build_request(&catalog, binding, &request).unwrap();
        assert!(xml.contains("<Departure>&lt;a &amp; b&gt;</Departure>"));
    }

    #[test]
    fn test_build_request_rejects_bad_names() {
        let catalog = catalog();
        let binding = catalog.operation("GetTrips").unwrap();
        let request = OperationRequest::new("GetTrips").param("bad name", "x");
        let err = build_request(&catalog, binding, &request).unwrap_err();
        assert!(matches!(err, GatewayError::Decoding(_)));
    }

    #[test]
    fn test_build_request_unqualified() {
        let mut catalog = catalog();
        catalog.qualified = false;
        let binding = catalog.operation("GetTrips").unwrap().clone();
        let request = OperationRequest::new("GetTrips").param("Departure", "x");
        let xml = build_request(&catalog, &binding, &request).unwrap();
        assert!(xml.contains(r#"<ns0:GetTrips xmlns:ns0="http://www.unistation.ru/saleport"><Departure>x</Departure></ns0:GetTrips>"#));
    }

    #[test]
    fn test_request_headers() {
        let (ct, action) = request_headers(SoapVersion::Soap11, "urn:GetTrips");
        assert_eq!(ct, "text/xml; charset=utf-8");
        assert_eq!(action.as_deref(), Some("\"urn:GetTrips\""));

        let (ct, action) = request_headers(SoapVersion::Soap12, "urn:GetTrips");
        assert_eq!(ct, "application/soap+xml; charset=utf-8; action=\"urn:GetTrips\"");
        assert!(action.is_none());
    }

    #[test]
    fn test_parse_response_single_part() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:GetTripsResponse xmlns:m="http://www.unistation.ru/saleport">
      <m:return><m:Elements><m:Id>1</m:Id></m:Elements></m:return>
    </m:GetTripsResponse>
  </soap:Body>
</soap:Envelope>"#;
        let result = parse_response(xml.as_bytes()).unwrap().unwrap();
        assert_eq!(result.name, "return");
        assert_eq!(result.child("Elements").unwrap().child("Id").unwrap().text(), "1");
    }

    #[test]
    fn test_parse_response_empty_wrapper() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body><m:GetDestinationsResponse xmlns:m="urn:x"/></soap:Body>
</soap:Envelope>"#;
        assert!(parse_response(xml.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_parse_response_multi_part() {
        let xml = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Body><m:R xmlns:m="urn:x"><m:a>1</m:a><m:b>2</m:b></m:R></soap:Body>
</soap:Envelope>"#;
        let result = parse_response(xml.as_bytes()).unwrap().unwrap();
        assert_eq!(result.name, "R");
        assert_eq!(result.children.len(), 2);
    }

    #[test]
    fn test_parse_soap11_fault() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Client</faultcode>
      <faultstring>Order 00000026685 not found</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;
        match parse_response(xml.as_bytes()).unwrap_err() {
            GatewayError::RemoteFault { code, message } => {
                assert_eq!(code, "soap:Client");
                assert_eq!(message, "Order 00000026685 not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fault_in(xml.as_bytes()).is_some());
    }

    #[test]
    fn test_parse_soap12_fault() {
        let xml = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body>
    <env:Fault>
      <env:Code><env:Value>env:Sender</env:Value></env:Code>
      <env:Reason><env:Text xml:lang="ru">Неверный идентификатор</env:Text></env:Reason>
    </env:Fault>
  </env:Body>
</env:Envelope>"#;
        match parse_response(xml.as_bytes()).unwrap_err() {
            GatewayError::RemoteFault { code, message } => {
                assert_eq!(code, "env:Sender");
                assert_eq!(message, "Неверный идентификатор");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_rejects_non_envelope() {
        let err = parse_response(b"<html><body>502 Bad Gateway</body></html>").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidXml(_)));
        assert!(fault_in(b"<html/>").is_none());
    }
}
