//! Operation registry.
//!
//! Maps each inbound route to one remote operation, the HTTP method it
//! accepts, and the ordered parameter schema used to build the request.

use crate::config::{EndpointKind, OperationMode, OperationsConfig};
use axum::http::Method;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Inbound HTTP method of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// Pure read on the remote system
    Get,
    /// Side effect on the remote system
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Get => *method == Method::GET,
            Self::Post => *method == Method::POST,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Remote parameter name
    pub name: String,
    /// Value sent when the request does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default: None,
        }
    }

    pub fn with_default(name: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            default: Some(default),
        }
    }
}

/// A `source -> target` field rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// Wrap a list result under a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListShaping {
    /// Key of the list in the response
    pub key: String,
    /// Keep only items whose field is truthy
    #[serde(default)]
    pub filter: Option<String>,
    /// Projected fields (all fields when empty)
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    /// Request parameters copied next to the list
    #[serde(default)]
    pub echo: Vec<FieldMapping>,
}

/// A route bound to one remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Inbound route path
    pub path: String,
    /// Remote operation name
    pub operation: String,
    /// Which service hosts the operation
    pub endpoint: EndpointKind,
    /// Accepted HTTP method
    pub method: HttpMethod,
    /// Parameters in wire order
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Optional list shaping of the result
    #[serde(default)]
    pub shaping: Option<ListShaping>,
}

impl OperationSpec {
    fn new(path: &str, operation: &str, endpoint: EndpointKind, method: HttpMethod) -> Self {
        Self {
            path: path.to_string(),
            operation: operation.to_string(),
            endpoint,
            method,
            params: Vec::new(),
            shaping: None,
        }
    }

    fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    fn shaping(mut self, shaping: ListShaping) -> Self {
        self.shaping = Some(shaping);
        self
    }
}

/// The set of mounted routes.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    specs: Vec<Arc<OperationSpec>>,
}

impl OperationRegistry {
    pub fn new(specs: Vec<OperationSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(Arc::new).collect(),
        }
    }

    /// The routes of the ticketing service.
    pub fn builtin() -> Self {
        use EndpointKind::{Sale, Schedule};
        use HttpMethod::{Get, Post};

        let empty = || json!("");
        let cheque = || json!({"ChequeWidth": "48"});
        let p = ParamSpec::required;
        let d = ParamSpec::with_default;

        Self::new(vec![
            OperationSpec::new("/", "GetBusStops", Schedule, Get).shaping(ListShaping {
                key: "travel_directions".to_string(),
                filter: Some("Automated".to_string()),
                fields: vec![FieldMapping::new("Id", "id"), FieldMapping::new("Name", "name")],
                echo: Vec::new(),
            }),
            OperationSpec::new("/get_destinations/", "GetDestinations", Sale, Get)
                .params(vec![p("Departure"), d("Substring", empty())])
                .shaping(ListShaping {
                    key: "end_directions".to_string(),
                    filter: None,
                    fields: vec![FieldMapping::new("Id", "id"), FieldMapping::new("Name", "name")],
                    echo: vec![FieldMapping::new("Departure", "departure")],
                }),
            OperationSpec::new("/search_trips/", "GetTrips", Sale, Get)
                .params(vec![p("Departure"), p("Destination"), p("TripsDate")]),
            OperationSpec::new("/search_trip_segment/", "GetTripSegment", Sale, Get)
                .params(vec![p("TripId"), p("Departure"), p("Destination")]),
            OperationSpec::new("/get_occupied_seats/", "GetOccupiedSeats", Sale, Get).params(vec![
                p("TripId"),
                p("Departure"),
                p("Destination"),
                d("OrderId", empty()),
            ]),
            OperationSpec::new("/start_sale_session/", "StartSaleSession", Sale, Post).params(vec![
                p("TripId"),
                p("Departure"),
                p("Destination"),
                d("OrderId", empty()),
            ]),
            OperationSpec::new("/add_tickets/", "AddTickets", Sale, Post)
                .params(vec![p("OrderId"), p("TicketSeats")]),
            OperationSpec::new("/del_tickets/", "DelTickets", Sale, Post)
                .params(vec![p("OrderId"), p("TicketSeats")]),
            OperationSpec::new("/set_ticket_data/", "SetTicketData", Sale, Post)
                .params(vec![p("OrderId"), p("Tickets")]),
            OperationSpec::new("/reserve_order/", "ReserveOrder", Sale, Post).params(vec![
                p("OrderId"),
                p("Customer"),
                d("ReserveKind", empty()),
                d("ChequeSettings", cheque()),
            ]),
            OperationSpec::new("/make_payment/", "Payment", Sale, Post).params(vec![
                p("OrderId"),
                d("TerminalId", empty()),
                d("TerminalSessionId", empty()),
                p("PaymentItems"),
                d("ChequeSettings", cheque()),
            ]),
            OperationSpec::new("/cancel_payment/", "CancelPayment", Sale, Post).params(vec![
                p("OrderId"),
                d("TicketSeats", empty()),
                d("Services", empty()),
                d("PaymentItems", empty()),
            ]),
            OperationSpec::new("/add_ticket_return/", "AddTicketReturn", Sale, Post).params(vec![
                p("TicketNumber"),
                d("SeatNum", json!("0")),
                p("Departure"),
                d("ReturnOrderId", empty()),
            ]),
            OperationSpec::new("/delete_ticket_return/", "DelTicketReturn", Sale, Post)
                .params(vec![p("ReturnOrderId"), p("TicketNumber")]),
            OperationSpec::new("/return_payment/", "ReturnPayment", Sale, Post).params(vec![
                p("ReturnOrderId"),
                d("TerminalId", empty()),
                d("TerminalSessionId", empty()),
                p("PaymentItems"),
                d("ChequeSettings", cheque()),
            ]),
            OperationSpec::new("/cancel_return_payment/", "CancelReturnPayment", Sale, Post)
                .params(vec![
                    p("ReturnOrderId"),
                    d("TicketSeats", empty()),
                    d("Services", empty()),
                    d("PaymentItems", empty()),
                ]),
            OperationSpec::new("/get_ticket_status/", "GetTicketStatus", Sale, Get).params(vec![
                p("DepartureId"),
                p("TicketId"),
                d("VendorId", empty()),
            ]),
        ])
    }

    /// Add routes, replacing any existing route with the same path.
    pub fn merge(mut self, routes: Vec<OperationSpec>) -> Self {
        for route in routes {
            let route = Arc::new(route);
            match self.specs.iter_mut().find(|s| s.path == route.path) {
                Some(existing) => *existing = route,
                None => self.specs.push(route),
            }
        }
        self
    }

    /// Keep only the operations the configuration exposes.
    pub fn filter(self, config: &OperationsConfig) -> Self {
        if !config.enabled {
            return self;
        }

        let patterns: Vec<Pattern> = config
            .actions
            .iter()
            .filter_map(|pattern| match Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Ignoring invalid operation pattern");
                    None
                }
            })
            .collect();

        let specs = self
            .specs
            .into_iter()
            .filter(|spec| {
                let listed = patterns.iter().any(|p| p.matches(&spec.operation));
                match config.mode {
                    OperationMode::Allowlist => listed,
                    OperationMode::Denylist => !listed,
                }
            })
            .collect();

        Self { specs }
    }

    pub fn find(&self, path: &str) -> Option<&Arc<OperationSpec>> {
        self.specs.iter().find(|s| s.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<OperationSpec>> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
