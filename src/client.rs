//! SOAP client: factory and operation invoker.

use crate::config::{EndpointDescriptor, SettingsConfig};
use crate::envelope::{build_request, fault_in, parse_response, request_headers, OperationRequest};
use crate::error::{GatewayError, Result};
use crate::parser::XmlElement;
use crate::wsdl::{parse_wsdl, ServiceCatalog, TypeHints};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Builds clients bound to one endpoint each.
///
/// The underlying HTTP connection pool is shared by every client it builds.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    http: reqwest::Client,
}

impl ClientFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Factory with the transport timeouts from `settings`.
    pub fn from_settings(settings: &SettingsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(http))
    }

    /// Fetch the endpoint's service description and return a ready client.
    pub async fn connect(&self, descriptor: &Arc<EndpointDescriptor>) -> Result<SoapClient> {
        if !descriptor.credentials.is_complete() {
            return Err(GatewayError::Config(format!(
                "credentials for the {} endpoint are missing",
                descriptor.kind
            )));
        }

        debug!(
            endpoint = %descriptor.kind,
            wsdl = %descriptor.wsdl_url,
            "Fetching service description"
        );

        let response = self
            .http
            .get(&descriptor.wsdl_url)
            .basic_auth(&descriptor.credentials.username, Some(&descriptor.credentials.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Transport(format!(
                "service description at {} returned HTTP {}",
                descriptor.wsdl_url, status
            )));
        }

        let body = response.bytes().await?;
        let catalog = parse_wsdl(&body)?;

        Ok(SoapClient {
            descriptor: Arc::clone(descriptor),
            http: self.http.clone(),
            catalog,
        })
    }
}

/// A client bound to one endpoint's catalog.
#[derive(Debug, Clone)]
pub struct SoapClient {
    descriptor: Arc<EndpointDescriptor>,
    http: reqwest::Client,
    catalog: ServiceCatalog,
}

impl SoapClient {
    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn hints(&self) -> &TypeHints {
        &self.catalog.hints
    }

    /// Invoke `request` once and return the raw result.
    ///
    /// `None` means the operation reported no result.
    pub async fn invoke(&self, request: &OperationRequest) -> Result<Option<XmlElement>> {
        let binding = self
            .catalog
            .operation(&request.operation)
            .ok_or_else(|| GatewayError::UnknownOperation(request.operation.clone()))?;

        let envelope = build_request(&self.catalog, binding, request)?;
        let (content_type, soap_action) = request_headers(self.catalog.version, &binding.soap_action);

        debug!(
            endpoint = %self.descriptor.kind,
            operation = %request.operation,
            address = %self.catalog.address,
            params = request.params.len(),
            "Invoking remote operation"
        );

        let mut builder = self
            .http
            .post(&self.catalog.address)
            .basic_auth(
                &self.descriptor.credentials.username,
                Some(&self.descriptor.credentials.password),
            )
            .header(CONTENT_TYPE, content_type)
            .body(envelope);
        if let Some(action) = soap_action {
            builder = builder.header("SOAPAction", action);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            // Faults usually come back as HTTP 500 with a proper envelope.
            if let Some(fault) = fault_in(&body) {
                return Err(fault);
            }
            warn!(
                endpoint = %self.descriptor.kind,
                operation = %request.operation,
                status = %status,
                "Remote service answered without a SOAP envelope"
            );
            return Err(GatewayError::Transport(format!(
                "remote service returned HTTP {}",
                status
            )));
        }

        parse_response(&body)
    }
}

/// Connect and invoke in one step, bounded by `timeout`.
pub async fn call_once(
    factory: &ClientFactory,
    descriptor: &Arc<EndpointDescriptor>,
    request: &OperationRequest,
    timeout: Duration,
) -> Result<(Option<XmlElement>, TypeHints)> {
    let work = async {
        let client = factory.connect(descriptor).await?;
        let raw = client.invoke(request).await?;
        Ok::<_, GatewayError>((raw, client.catalog.hints))
    };

    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| GatewayError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, EndpointKind};

    fn descriptor(url: &str, credentials: Credentials) -> Arc<EndpointDescriptor> {
        Arc::new(EndpointDescriptor {
            kind: EndpointKind::Sale,
            wsdl_url: url.to_string(),
            credentials,
        })
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_network() {
        let factory = ClientFactory::new(reqwest::Client::new());
        // An address that would fail at the transport level if it were contacted.
        let descriptor = descriptor("http://127.0.0.1:1/ws/SalePort?wsdl", Credentials::new("", ""));

        let err = factory.connect(&descriptor).await.unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_partial_credentials_are_rejected() {
        let factory = ClientFactory::new(reqwest::Client::new());
        let descriptor = descriptor("http://127.0.0.1:1/ws", Credentials::new("wsuser", ""));
        let err = factory.connect(&descriptor).await.unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let factory = ClientFactory::new(reqwest::Client::new());
        let descriptor = descriptor(
            &format!("http://{}/ws/SalePort?wsdl", addr),
            Credentials::new("wsuser", "sales"),
        );
        let err = factory.connect(&descriptor).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)), "got {:?}", err);
    }

    #[test]
    fn test_factory_from_settings() {
        assert!(ClientFactory::from_settings(&SettingsConfig::default()).is_ok());
    }
}
