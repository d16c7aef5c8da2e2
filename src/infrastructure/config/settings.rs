use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret every client must present as `?token=`
    pub token: String,
}

// Keep the secret out of debug logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("token", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: Option<PathBuf>,
    /// PEM private key
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Deliver a message back to the client that sent it
    #[serde(default = "default_echo_to_sender")]
    pub echo_to_sender: bool,
    /// Outbound queue depth per connection
    #[serde(default = "default_send_buffer_size")]
    pub send_buffer_size: usize,
    /// A delivery not queued within this window counts as failed
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// How long a closing connection waits for its writer to flush
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    /// Upper bound on waiting for connections to close on shutdown
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_echo_to_sender() -> bool {
    true
}

fn default_send_buffer_size() -> usize {
    32
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_close_timeout_ms() -> u64 {
    1000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RELAY_AUTH__TOKEN, RELAY_SERVER__PORT, RELAY_RELAY__ECHO_TO_SENDER, ...
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            .build()?;

        Self::from_config(config)
    }

    /// Deserialize and validate an already-built configuration
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token.is_empty() {
            return Err(ConfigError::Message("auth.token must not be empty".into()));
        }

        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            return Err(ConfigError::Message(
                "tls.cert_path and tls.key_path must be set together".into(),
            ));
        }

        if self.relay.send_buffer_size == 0 {
            return Err(ConfigError::Message(
                "relay.send_buffer_size must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Certificate and key paths when TLS is configured
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls.cert_path.as_ref().zip(self.tls.key_path.as_ref())
    }

    /// Settings with every default filled in and the given secret
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig {
                token: token.into(),
            },
            tls: TlsConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
            shutdown: ShutdownSettings::default(),
        }
    }
}

impl RelayConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl ShutdownSettings {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: default_echo_to_sender(),
            send_buffer_size: default_send_buffer_size(),
            send_timeout_ms: default_send_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}
