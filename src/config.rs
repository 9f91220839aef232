//! Configuration manager for adguidsync.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::error::{Error, Result};
use crate::loader::{BatchPolicy, DEFAULT_MAX_BATCH_SIZE};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_ITSYSTEM_USER_KEY: &str = "Active Directory";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Configuration {
    /// Instance name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Port the HTTP triggers listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds before a trigger request gives up waiting. Synchronization
    /// keeps running in the background.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to OS2mo GraphQL configuration.
    #[serde(skip_serializing)]
    #[validate(nested)]
    pub registry: Registry,
    /// Related to Active Directory configuration.
    #[serde(skip_serializing)]
    #[validate(nested)]
    pub ldap: Ldap,
    /// IT-system receiving the ADGUID IT users.
    #[serde(default)]
    #[validate(nested)]
    pub it_system: ItSystem,
    #[serde(default)]
    #[validate(nested)]
    pub batch: Batch,
    #[serde(default)]
    #[validate(nested)]
    pub sync: Synchronization,
    #[serde(default)]
    pub telemetry: Telemetry,
}

/// OS2mo configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Registry {
    /// Base URL of OS2mo, without the `/graphql` path.
    #[validate(length(min = 1))]
    pub url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    #[serde(default = "default_graphql_version")]
    #[validate(range(min = 1))]
    pub graphql_version: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Registry {
    /// Endpoint of the versioned GraphQL API.
    pub fn graphql_url(&self) -> String {
        format!(
            "{}/graphql/v{}",
            self.url.trim_end_matches('/'),
            self.graphql_version
        )
    }
}

/// Domain controller to query.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Controller {
    /// Hostname or IP of the controller.
    #[validate(length(min = 1))]
    pub host: String,
    /// Defaults to 636 with SSL and 389 without.
    pub port: Option<u16>,
    #[serde(default)]
    pub use_ssl: bool,
    /// Skip certificate verification.
    #[serde(default)]
    pub insecure: bool,
    /// Seconds to wait for a connection.
    #[serde(default = "default_ldap_timeout")]
    pub timeout: u64,
}

impl Controller {
    /// LDAP URL for this controller.
    pub fn url(&self) -> String {
        let (scheme, default_port) = if self.use_ssl {
            ("ldaps", 636)
        } else {
            ("ldap", 389)
        };
        format!(
            "{scheme}://{}:{}",
            self.host,
            self.port.unwrap_or(default_port)
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Active Directory configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Ldap {
    #[validate(length(min = 1), nested)]
    pub controllers: Vec<Controller>,
    /// Domain used when binding, as in `DOMAIN\user`.
    pub domain: String,
    pub user: String,
    pub password: String,
    /// Attribute holding the CPR number.
    #[validate(length(min = 1))]
    pub cpr_attribute: String,
    /// Search base of every request.
    #[validate(length(min = 1))]
    pub search_base: String,
}

impl Ldap {
    /// Bind DN in down-level logon form.
    pub fn bind_dn(&self) -> String {
        if self.domain.is_empty() {
            self.user.clone()
        } else {
            format!("{}\\{}", self.domain, self.user)
        }
    }
}

/// IT-system configuration.
///
/// `uuid` wins over `user_key` when both are set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ItSystem {
    pub uuid: Option<Uuid>,
    #[serde(default = "default_itsystem_user_key")]
    #[validate(length(min = 1))]
    pub user_key: String,
}

impl Default for ItSystem {
    fn default() -> Self {
        Self {
            uuid: None,
            user_key: default_itsystem_user_key(),
        }
    }
}

/// Batch window of every loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Batch {
    /// Milliseconds a batch stays open. `0` closes it on the next yield.
    pub window_ms: u64,
    #[validate(range(min = 1))]
    pub max_size: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            window_ms: 5,
            max_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl Batch {
    pub fn policy(&self) -> BatchPolicy {
        BatchPolicy {
            window: Duration::from_millis(self.window_ms),
            max_batch_size: self.max_size,
        }
    }
}

/// Fan-out configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Synchronization {
    /// Employees synchronized at the same time.
    #[validate(range(min = 1))]
    pub concurrency: usize,
}

impl Default for Synchronization {
    fn default() -> Self {
        Self { concurrency: 64 }
    }
}

/// OpenTelemetry export configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// OTLP gRPC endpoint. Export is disabled when unset.
    pub otlp_endpoint: Option<String>,
}

fn default_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_graphql_version() -> u32 {
    3
}

fn default_timeout() -> u64 {
    30
}

fn default_ldap_timeout() -> u64 {
    5
}

fn default_itsystem_user_key() -> String {
    DEFAULT_ITSYSTEM_USER_KEY.into()
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    /// Reads the configuration file from `path`, or `config.yaml` when
    /// `path` is not a file.
    pub fn read(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let file_path = if path.as_ref().is_file() {
            path.as_ref().to_path_buf()
        } else {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        };

        let file = File::open(&file_path).map_err(|err| {
            Error::Config(format!("cannot open `{}`: {err}", file_path.display()))
        })?;
        let config: Configuration = serde_yaml::from_reader(file)
            .map_err(|err| Error::Config(err.to_string()))?;

        let mut config = config.finish()?;
        config.path = file_path;
        Ok(Arc::new(config))
    }

    /// Parse a YAML document.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Configuration = serde_yaml::from_str(yaml)
            .map_err(|err| Error::Config(err.to_string()))?;
        config.finish()
    }

    /// Path the configuration was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn finish(mut self) -> Result<Self> {
        // set app version.
        self.version = VERSION.to_owned();
        self.registry.url = normalize_url(&self.registry.url)?;
        self.validate()?;
        Ok(self)
    }
}

/// Normalizes a URL string by ensuring it starts with a valid scheme
/// (`http` or `https`).
fn normalize_url(url: &str) -> Result<String> {
    let url_with_scheme =
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

    let parsed_url = Url::parse(&url_with_scheme)
        .map_err(|err| Error::Config(format!("invalid URL `{url}`: {err}")))?;
    Ok(parsed_url.as_str().trim_end_matches('/').to_owned())
}
