//! Application configuration options

use std::sync::Arc;
use std::time::Duration;

use crate::storage::settings::Settings;
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Loaded settings, shared read-only with every component
    pub settings: Arc<Settings>,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployer worker options
    pub deployer: deployer::Options,
}

impl AppOptions {
    pub fn from_settings(settings: Settings) -> Self {
        let server = ServerOptions {
            host: settings.server.host.clone(),
            port: settings.server.port,
        };
        let deployer = deployer::Options {
            workers: settings.deploy.workers,
            timeout: settings.deploy.timeout(),
        };
        Self {
            lifecycle: LifecycleOptions::default(),
            settings: Arc::new(settings),
            enable_socket_server: true,
            server,
            deployer,
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(Settings::default())
    }
}

/// Lifecycle options for the agent
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8720,
        }
    }
}
