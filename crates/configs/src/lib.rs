use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Catalog identity registered with the cloud controller.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_id")]
    pub id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { name: default_service_name(), id: default_service_id() }
    }
}

fn default_service_name() -> String { "azuresmbvolume".into() }
fn default_service_id() -> String { "06948cb0-cad7-4buh-leba-9ed8b5c345a3".into() }

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    File,
    Sql,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { kind: StoreKind::File, state_file: default_state_file() }
    }
}

fn default_state_file() -> String { "data/broker_state.json".into() }

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 600 }
fn default_max_lifetime() -> u64 { 3600 }
fn default_acquire_timeout() -> u64 { 30 }

/// Fallbacks applied when a provision request omits the Azure coordinates.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AzureConfig {
    #[serde(default)]
    pub default_subscription_id: String,
    #[serde(default)]
    pub default_resource_group_name: String,
}

/// What the broker may create or delete on the operator's behalf.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ControlConfig {
    #[serde(default = "enabled")]
    pub allow_create_storage_account: bool,
    #[serde(default = "enabled")]
    pub allow_create_file_share: bool,
    #[serde(default)]
    pub allow_delete_storage_account: bool,
    #[serde(default)]
    pub allow_delete_file_share: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            allow_create_storage_account: true,
            allow_create_file_share: true,
            allow_delete_storage_account: false,
            allow_delete_file_share: false,
        }
    }
}

fn enabled() -> bool { true }

/// Bind-time mount option policy.
///
/// `allowed_options` is a comma separated list of keys callers may set.
/// `default_options` is a comma separated list of `key:value` pairs; a default
/// whose key is not allowed becomes a fixed value callers cannot override.
/// Both lists are parsed by the service when the broker is built.
#[derive(Debug, Clone, Deserialize)]
pub struct MountConfig {
    #[serde(default = "default_allowed_options")]
    pub allowed_options: String,
    #[serde(default = "default_default_options")]
    pub default_options: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self { allowed_options: default_allowed_options(), default_options: default_default_options() }
    }
}

fn default_allowed_options() -> String { "share,uid,gid,file_mode,dir_mode,readonly,vers,mount".into() }
fn default_default_options() -> String { "vers:3.0".into() }

/// Log output; `RUST_LOG` still overrides the filter.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

pub fn load_default() -> Result<BrokerConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<BrokerConfig> {
    let content = std::fs::read_to_string(path)?;
    from_toml_str(&content)
}

pub fn from_toml_str(content: &str) -> Result<BrokerConfig> {
    let cfg: BrokerConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl BrokerConfig {
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.service.normalize()?;
        self.store.normalize()?;
        self.azure.normalize();
        if self.store.kind == StoreKind::Sql {
            // fill the URL from DATABASE_URL when the TOML leaves it out
            self.database.normalize_from_env();
            self.database.validate()?;
        }
        Ok(())
    }
}

impl ServiceConfig {
    fn normalize(&mut self) -> Result<()> {
        self.name = self.name.trim().to_string();
        self.id = self.id.trim().to_string();
        if self.name.is_empty() {
            return Err(anyhow!("service.name must not be empty"));
        }
        if self.id.is_empty() {
            return Err(anyhow!("service.id must not be empty"));
        }
        Ok(())
    }
}

impl StoreConfig {
    fn normalize(&mut self) -> Result<()> {
        self.state_file = self.state_file.trim().to_string();
        if self.kind == StoreKind::File && self.state_file.is_empty() {
            return Err(anyhow!("store.state_file is required for the file store"));
        }
        Ok(())
    }
}

impl AzureConfig {
    fn normalize(&mut self) {
        self.default_subscription_id = self.default_subscription_id.trim().to_string();
        self.default_resource_group_name = self.default_resource_group_name.trim().to_string();
    }
}

impl DatabaseConfig {
    pub fn normalize_from_env(&mut self) {
        if self.url.trim().is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                self.url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("database.url is empty; set it in config.toml or DATABASE_URL"));
        }
        let lower = self.url.to_lowercase();
        let known = ["postgresql://", "postgres://", "mysql://", "sqlite:"];
        if !known.iter().any(|p| lower.starts_with(p)) {
            return Err(anyhow!("database.url must start with postgres://, mysql:// or sqlite:"));
        }
        if self.min_connections == 0 {
            return Err(anyhow!("database.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database timeouts must be positive seconds"));
        }
        Ok(())
    }
}
