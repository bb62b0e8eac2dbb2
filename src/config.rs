//! Configuration types for the SOAP gateway.

use crate::error::{GatewayError, Result};
use crate::registry::OperationSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default schedule service description.
pub const DEFAULT_SCHEDULE_WSDL: &str = "http://dev.avibus.pro/UEEDev/ws/SchedulePort?wsdl";
/// Default sale service description.
pub const DEFAULT_SALE_WSDL: &str = "http://dev.avibus.pro/UEEDev/ws/SalePort?wsdl";

/// Main configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Remote service descriptions
    pub endpoints: EndpointsConfig,

    /// Where credentials come from
    pub credentials: CredentialsConfig,

    /// Which operations are exposed
    pub operations: OperationsConfig,

    /// Extra routes, replacing built-ins with the same path
    pub routes: Vec<OperationSpec>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            endpoints: EndpointsConfig::default(),
            credentials: CredentialsConfig::default(),
            operations: OperationsConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Check the values that cannot be caught by deserialization.
    pub fn validate(&self) -> Result<()> {
        for (name, address) in [
            ("schedule", &self.endpoints.schedule),
            ("sale", &self.endpoints.sale),
        ] {
            url::Url::parse(address).map_err(|e| {
                GatewayError::Config(format!("invalid {} endpoint {:?}: {}", name, address, e))
            })?;
        }

        if self.settings.request_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "settings.request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "route path {:?} must start with '/'",
                    route.path
                )));
            }
        }

        Ok(())
    }

    /// Build the descriptor for one endpoint.
    pub fn descriptor(&self, kind: EndpointKind, credentials: &Credentials) -> EndpointDescriptor {
        let wsdl_url = match kind {
            EndpointKind::Schedule => self.endpoints.schedule.clone(),
            EndpointKind::Sale => self.endpoints.sale.clone(),
        };
        EndpointDescriptor {
            kind,
            wsdl_url,
            credentials: credentials.clone(),
        }
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Address the HTTP server binds to
    pub listen_address: String,

    /// Upper bound for one pipeline call (WSDL fetch + invocation)
    pub request_timeout_secs: u64,

    /// TCP connect timeout for the remote service
    pub connect_timeout_secs: u64,

    /// Maximum inbound body size (bytes)
    pub max_body_size: usize,
}

impl SettingsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8000".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_body_size: 1_048_576, // 1MB
        }
    }
}

/// Remote WSDL locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Schedule service (bus stops)
    pub schedule: String,

    /// Sale service (trips, seats, orders, payments, returns)
    pub sale: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE_WSDL.to_string(),
            sale: DEFAULT_SALE_WSDL.to_string(),
        }
    }
}

/// Environment variables holding the service account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Variable holding the username
    pub username_var: String,

    /// Variable holding the password
    pub password_var: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username_var: "USER_NAME".to_string(),
            password_var: "PASSWORD".to_string(),
        }
    }
}

/// Operation exposure control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Enable filtering; when disabled every route is mounted
    pub enabled: bool,

    /// Mode: allowlist or denylist
    pub mode: OperationMode,

    /// Remote operation names (supports glob patterns)
    pub actions: Vec<String>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: OperationMode::Allowlist,
            actions: Vec::new(),
        }
    }
}

/// Operation filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Only mount listed operations
    #[default]
    Allowlist,
    /// Mount everything except listed operations
    Denylist,
}

/// Remote service identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Stop and direction lookup
    Schedule,
    /// Trip search, seats, tickets, orders, payments
    Sale,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Sale => "sale",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Basic-auth credential pair for the remote service.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read the pair from the configured environment variables.
    ///
    /// Missing variables yield empty values; the client factory rejects them.
    pub fn from_env(config: &CredentialsConfig) -> Self {
        Self {
            username: std::env::var(&config.username_var).unwrap_or_default(),
            password: std::env::var(&config.password_var).unwrap_or_default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One remote SOAP service: identity, description address and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub kind: EndpointKind,
    pub wsdl_url: String,
    pub credentials: Credentials,
}

/// Both descriptors, built once at start.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub schedule: Arc<EndpointDescriptor>,
    pub sale: Arc<EndpointDescriptor>,
}

impl Endpoints {
    pub fn from_config(config: &GatewayConfig, credentials: &Credentials) -> Self {
        Self {
            schedule: Arc::new(config.descriptor(EndpointKind::Schedule, credentials)),
            sale: Arc::new(config.descriptor(EndpointKind::Sale, credentials)),
        }
    }

    pub fn get(&self, kind: EndpointKind) -> &Arc<EndpointDescriptor> {
        match kind {
            EndpointKind::Schedule => &self.schedule,
            EndpointKind::Sale => &self.sale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.endpoints.sale, DEFAULT_SALE_WSDL);
        assert_eq!(config.credentials.username_var, "USER_NAME");
        assert_eq!(config.settings.request_timeout(), Duration::from_secs(30));
        assert!(!config.operations.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = GatewayConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.settings.max_body_size, config.settings.max_body_size);
        assert_eq!(parsed.endpoints.schedule, config.endpoints.schedule);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
version: "1"
settings:
  listen_address: "0.0.0.0:9000"
  request_timeout_secs: 5
endpoints:
  sale: "https://tickets.example.org/ws/SalePort?wsdl"
operations:
  enabled: true
  mode: denylist
  actions:
    - "*Payment"
routes:
  - path: /get_bus_stops/
    operation: GetBusStops
    endpoint: schedule
    method: GET
"#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.settings.listen_address, "0.0.0.0:9000");
        assert_eq!(config.settings.request_timeout_secs, 5);
        assert_eq!(config.settings.connect_timeout_secs, 10);
        assert_eq!(config.endpoints.schedule, DEFAULT_SCHEDULE_WSDL);
        assert_eq!(config.operations.mode, OperationMode::Denylist);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].endpoint, EndpointKind::Schedule);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = GatewayConfig::default();
        config.endpoints.sale = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("sale"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = GatewayConfig::default();
        config.settings.request_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("wsuser", "sales");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("wsuser"));
        assert!(!debug.contains("sales"));
    }

    #[test]
    fn test_credentials_completeness() {
        assert!(Credentials::new("u", "p").is_complete());
        assert!(!Credentials::new("", "p").is_complete());
        assert!(!Credentials::new("u", "").is_complete());
        assert!(!Credentials::default().is_complete());
    }

    #[test]
    fn test_credentials_from_missing_env() {
        let config = CredentialsConfig {
            username_var: "TICKET_GATEWAY_TEST_MISSING_USER".to_string(),
            password_var: "TICKET_GATEWAY_TEST_MISSING_PASSWORD".to_string(),
        };
        let credentials = Credentials::from_env(&config);
        assert!(!credentials.is_complete());
    }

    #[test]
    fn test_endpoints_share_credentials() {
        let config = GatewayConfig::default();
        let endpoints = Endpoints::from_config(&config, &Credentials::new("u", "p"));
        assert_eq!(endpoints.get(EndpointKind::Schedule).wsdl_url, DEFAULT_SCHEDULE_WSDL);
        assert_eq!(endpoints.get(EndpointKind::Sale).kind, EndpointKind::Sale);
        assert_eq!(endpoints.sale.credentials, endpoints.schedule.credentials);
    }
}
