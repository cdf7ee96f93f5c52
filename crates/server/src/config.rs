use anyhow::{bail, Context, Result};
use conduit_mcp::clock::SystemClock;
use conduit_mcp::session::{SessionConfig, SessionManager, DEFAULT_MESSAGE_PATH};
use conduit_mcp::tools::builtin_registry;
use conduit_mcp::McpServer;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Which front end the server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Plain request/response on POST /mcp
    Http,
    /// SSE stream on GET /sse with correlated POST /messages
    Sse,
}

impl TransportMode {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 3000,
            Self::Sse => 3001,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// On-disk configuration (`conduit.toml`); every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<TransportMode>,
    pub heartbeat_secs: Option<u64>,
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<TransportMode>,
    pub heartbeat_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportMode,
    #[serde(skip)]
    pub heartbeat_interval: Duration,
}

impl ServerConfig {
    pub fn load(config_path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        let file: FileConfig = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            FileConfig::default()
        };

        Self::resolve(file, overrides)
    }

    /// Merge file values and overrides; overrides win
    pub fn resolve(file: FileConfig, overrides: ConfigOverrides) -> Result<Self> {
        let transport = overrides
            .transport
            .or(file.server.transport)
            .unwrap_or(TransportMode::Http);

        let host = overrides
            .host
            .or(file.server.host)
            .unwrap_or_else(default_host);
        let host = host.trim().to_string();
        if host.is_empty() || host.contains(char::is_whitespace) {
            bail!("Invalid host: {:?}", host);
        }

        let port = overrides
            .port
            .or(file.server.port)
            .unwrap_or_else(|| transport.default_port());

        let heartbeat_secs = overrides
            .heartbeat_secs
            .or(file.server.heartbeat_secs)
            .unwrap_or(DEFAULT_HEARTBEAT_SECS);
        if heartbeat_secs == 0 {
            bail!("Heartbeat interval must be greater than zero");
        }

        Ok(Self {
            host,
            port,
            transport,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn bind_address(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub mcp: Arc<McpServer>,
    pub sessions: SessionManager,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let registry =
            builtin_registry(Arc::new(SystemClock)).context("Failed to build tool registry")?;
        tracing::info!("Registered {} tools", registry.len());

        let sessions = SessionManager::new(SessionConfig {
            heartbeat_interval: config.heartbeat_interval,
            message_path: DEFAULT_MESSAGE_PATH.to_string(),
            ..SessionConfig::default()
        });

        Ok(Self {
            mcp: Arc::new(McpServer::new(registry)),
            sessions,
            config: Arc::new(config.clone()),
        })
    }
}
