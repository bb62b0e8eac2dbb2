//! JSON gateway for the ticketing SOAP services
//!
//! Exposes the schedule and sale operations of a WSDL-described SOAP
//! service as plain JSON routes. Each route is bound to exactly one remote
//! operation; the request parameters are passed through by name and the
//! SOAP response is normalized into a JSON tree.
//!
//! # Pipeline
//!
//! - [`client::ClientFactory`] fetches the service description with basic auth
//! - [`client::SoapClient`] encodes the envelope and invokes the operation
//! - [`normalizer`] turns the raw XML result into a [`normalizer::Node`]
//! - [`gateway`] maps HTTP requests onto operations and errors onto JSON
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ticket_soap_gateway::{
//!     router, ClientFactory, Credentials, Endpoints, Gateway, GatewayConfig,
//!     OperationRegistry, SoapPipeline,
//! };
//!
//! let config = GatewayConfig::default();
//! let credentials = Credentials::from_env(&config.credentials);
//! let pipeline = SoapPipeline::new(
//!     ClientFactory::from_settings(&config.settings)?,
//!     Endpoints::from_config(&config, &credentials),
//!     config.settings.request_timeout(),
//! );
//! let gateway = Gateway::new(Arc::new(pipeline), OperationRegistry::builtin());
//! let app = router(Arc::new(gateway), config.settings.max_body_size);
//! ```

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod wsdl;

pub use client::{ClientFactory, SoapClient};
pub use config::{Credentials, EndpointDescriptor, EndpointKind, Endpoints, GatewayConfig};
pub use envelope::OperationRequest;
pub use error::{ErrorKind, GatewayError};
pub use gateway::{router, Gateway, HealthReport};
pub use normalizer::{normalize_response, Node};
pub use pipeline::{OperationBackend, RawResponse, SoapPipeline};
pub use registry::{OperationRegistry, OperationSpec};
