//! Settings for the console. Read from a TOML file (default
//! `config/console.toml`), then from `CONSOLE__<SECTION>__<KEY>` environment
//! variables, then from the command line.
use clap::{Parser, ValueEnum};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "config/console.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Supabase,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Provider {
    pub kind: ProviderKind,
    pub base_url: String,
    pub service_key: String,
    pub timeout_secs: u64,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: "http://127.0.0.1:54321".to_string(),
            service_key: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub email_domain: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            email_domain: engine::DEFAULT_IDENTITY_DOMAIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Admin {
    pub username: String,
    pub password: String,
    pub protect_users: bool,
}

impl Default for Admin {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: String::new(),
            protect_users: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub server: Server,
    pub provider: Provider,
    pub identity: Identity,
    pub admin: Admin,
}

#[derive(Debug, Parser)]
#[command(name = "console_admin", disable_version_flag = true)]
struct Args {
    /// Optional config file path (TOML).
    #[arg(long)]
    config: Option<String>,
    /// Override the listening address.
    #[arg(long)]
    bind: Option<String>,
    /// Override the listening port.
    #[arg(long)]
    port: Option<u16>,
    /// Override the backend provider.
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,
    /// Override the log level.
    #[arg(long)]
    level: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let args = Args::parse();

        let config_path = args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
        let mut settings: Settings = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                Environment::with_prefix("CONSOLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Some(bind) = args.bind {
            settings.server.bind = bind;
        }
        if let Some(port) = args.port {
            settings.server.port = port;
        }
        if let Some(provider) = args.provider {
            settings.provider.kind = provider;
        }
        if let Some(level) = args.level {
            settings.app.level = level;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.kind == ProviderKind::Supabase && self.provider.service_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "provider.service_key is required for the supabase provider".to_string(),
            ));
        }
        if self.admin.username.trim().is_empty() || self.admin.password.is_empty() {
            return Err(ConfigError::Message(
                "admin.username and admin.password must be set".to_string(),
            ));
        }
        Ok(())
    }
}
