mod settings;

pub use settings::{
    AuthConfig, LogFormat, LoggingConfig, RelayConfig, ServerConfig, Settings, ShutdownSettings,
    TlsConfig,
};
