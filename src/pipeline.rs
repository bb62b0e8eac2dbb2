//! Backend seam between the HTTP adapter and the remote services.

use crate::client::{call_once, ClientFactory};
use crate::config::{EndpointKind, Endpoints};
use crate::envelope::OperationRequest;
use crate::error::Result;
use crate::parser::XmlElement;
use crate::wsdl::TypeHints;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Raw result of one remote call, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub body: Option<XmlElement>,
    pub hints: TypeHints,
}

/// Executes one named operation against one endpoint.
#[async_trait]
pub trait OperationBackend: Send + Sync {
    async fn execute(&self, endpoint: EndpointKind, request: OperationRequest) -> Result<RawResponse>;
}

/// Backend that talks SOAP to the configured endpoints.
///
/// Every call builds a fresh client, so no service description state is
/// shared between requests.
pub struct SoapPipeline {
    factory: ClientFactory,
    endpoints: Endpoints,
    timeout: Duration,
}

impl SoapPipeline {
    pub fn new(factory: ClientFactory, endpoints: Endpoints, timeout: Duration) -> Self {
        Self {
            factory,
            endpoints,
            timeout,
        }
    }
}

#[async_trait]
impl OperationBackend for SoapPipeline {
    async fn execute(&self, endpoint: EndpointKind, request: OperationRequest) -> Result<RawResponse> {
        let descriptor = self.endpoints.get(endpoint);
        let (body, hints) = call_once(&self.factory, descriptor, &request, self.timeout).await?;

        debug!(
            endpoint = %endpoint,
            operation = %request.operation,
            empty = body.is_none(),
            "Remote operation completed"
        );

        Ok(RawResponse { body, hints })
    }
}
