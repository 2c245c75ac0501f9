//! Agent configuration
//!
//! Every section has a usable `Default`; a JSON file only needs to name
//! what differs. Durations are written in milliseconds.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use varsync_core::{
    AccessType, DataType, ProviderId, VariableDefinition, VarsyncError, VarsyncResult,
};
use varsync_transport::auth::PROVIDER_SCOPE;

pub use varsync_transport::{ConnectionSettings, OAuthCredentials};

/// Default provider id of the sample setup
pub const DEFAULT_PROVIDER_ID: &str = "sampleprovider";

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Logging setup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub filter: String,
    /// One JSON object per line instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Provider agent configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider_id: ProviderId,
    pub connection: ConnectionSettings,
    pub oauth: OAuthCredentials,
    /// Broadcast period
    #[serde(rename = "publish_interval_ms", with = "duration_ms")]
    pub publish_interval: Duration,
    /// Reject writes to read-only variables
    pub enforce_write_access: bool,
    /// Broadcast the full state right after every write command
    pub broadcast_after_write: bool,
    pub variables: Vec<VariableDefinition>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            provider_id: ProviderId::new(DEFAULT_PROVIDER_ID),
            connection: ConnectionSettings {
                client_name: DEFAULT_PROVIDER_ID.to_string(),
                ..ConnectionSettings::default()
            },
            oauth: OAuthCredentials {
                client_name: DEFAULT_PROVIDER_ID.to_string(),
                scope: PROVIDER_SCOPE.to_string(),
                ..OAuthCredentials::default()
            },
            publish_interval: Duration::from_secs(1),
            enforce_write_access: true,
            broadcast_after_write: true,
            variables: default_variables(),
        }
    }
}

impl ProviderConfig {
    pub fn new(provider_id: impl Into<ProviderId>, variables: Vec<VariableDefinition>) -> Self {
        ProviderConfig {
            provider_id: provider_id.into(),
            variables,
            ..ProviderConfig::default()
        }
    }

    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Check the provider id and that ids and keys are unique
    pub fn validate(&self) -> VarsyncResult<()> {
        if !self.provider_id.is_valid() {
            return Err(VarsyncError::Config(format!(
                "Invalid provider id {:?}",
                self.provider_id.as_str()
            )));
        }
        if self.publish_interval.is_zero() {
            return Err(VarsyncError::Config(
                "Publish interval must be positive".into(),
            ));
        }

        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        for def in &self.variables {
            if !ids.insert(def.id) {
                return Err(VarsyncError::Config(format!(
                    "Duplicate variable id {}",
                    def.id
                )));
            }
            if !keys.insert(def.key.as_str()) {
                return Err(VarsyncError::Config(format!(
                    "Duplicate variable key {:?}",
                    def.key
                )));
            }
        }
        Ok(())
    }
}

/// Consumer agent configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Provider to follow
    pub provider_id: ProviderId,
    pub connection: ConnectionSettings,
    pub oauth: OAuthCredentials,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            provider_id: ProviderId::new(DEFAULT_PROVIDER_ID),
            connection: ConnectionSettings {
                client_name: "sampleconsumer".to_string(),
                ..ConnectionSettings::default()
            },
            oauth: OAuthCredentials {
                client_name: "sampleconsumer".to_string(),
                ..OAuthCredentials::default()
            },
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl ConsumerConfig {
    pub fn new(provider_id: impl Into<ProviderId>) -> Self {
        ConsumerConfig {
            provider_id: provider_id.into(),
            ..ConsumerConfig::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Everything a hub process reads from one file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub log: LogConfig,
    pub provider: Option<ProviderConfig>,
    pub consumer: Option<ConsumerConfig>,
}

impl HubConfig {
    pub fn from_json_str(json: &str) -> VarsyncResult<Self> {
        let config: HubConfig = serde_json::from_str(json)
            .map_err(|e| VarsyncError::Config(format!("Invalid configuration: {}", e)))?;
        if let Some(provider) = &config.provider {
            provider.validate()?;
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> VarsyncResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            VarsyncError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> VarsyncResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VarsyncError::Config(format!("Cannot serialize configuration: {}", e)))
    }
}

/// The sample provider's variables: digital nameplate and diagnostics
pub fn default_variables() -> Vec<VariableDefinition> {
    use AccessType::{ReadOnly, ReadWrite};
    vec![
        VariableDefinition::new(1, "digital_nameplate.manufacturer_name", DataType::String, ReadOnly),
        VariableDefinition::new(2, "digital_nameplate.serial_number", DataType::String, ReadOnly),
        VariableDefinition::new(3, "digital_nameplate.year_of_construction", DataType::Int64, ReadOnly),
        VariableDefinition::new(4, "digital_nameplate.hardware_version", DataType::String, ReadOnly),
        VariableDefinition::new(5, "diagnostics.status_text", DataType::String, ReadWrite),
        VariableDefinition::new(6, "diagnostics.error_count", DataType::Int64, ReadWrite),
        VariableDefinition::new(7, "diagnostics.temperature", DataType::Float64, ReadOnly),
        VariableDefinition::new(8, "diagnostics.is_running", DataType::Boolean, ReadWrite),
    ]
}
