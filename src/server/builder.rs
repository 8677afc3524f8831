//! A builder for assembling a [`Server`].
//!
//! ## Example
//! ```ignore
//! let server = ServerBuilder::from_config(ServerConfig::ephemeral())
//!     .debug(true)
//!     .start()
//!     .await?;
//! let address = server.address("127.0.0.1");
//! ```

use tokio::sync::mpsc;
use tracing::info;

use crate::config::ServerConfig;
use crate::config::TreebusConfig;
use crate::server::Server;
use crate::server::ServerContext;
use crate::store::TreeStore;
use crate::Result;

/// Capacity of the control queue. Restart requests beyond it are dropped.
const CONTROL_QUEUE_SIZE: usize = 8;

pub struct ServerBuilder {
    config: ServerConfig,
    debug: bool,
    seed: Option<TreeStore>,
}

impl ServerBuilder {
    /// Load the server section from the layered configuration sources,
    /// optionally overlaid with `config_path`.
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let mut config = TreebusConfig::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", p);
            config = config.with_override_config(p)?;
        }
        let config = config.validate()?;
        Ok(Self::from_config(config.server))
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            debug: false,
            seed: None,
        }
    }

    /// Forward server diagnostics to LOG subscribers from the start
    pub fn debug(
        mut self,
        enabled: bool,
    ) -> Self {
        self.debug = enabled;
        self
    }

    /// Initial contents of the store
    pub fn seed(
        mut self,
        store: TreeStore,
    ) -> Self {
        self.seed = Some(store);
        self
    }

    pub fn server_config(
        mut self,
        config: ServerConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Server> {
        self.config.validate()?;
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        let ctx = ServerContext::new(self.config, control_tx);
        ctx.set_debug(self.debug);
        if let Some(seed) = self.seed {
            ctx.store.replace_with(seed);
        }
        Ok(Server::new(ctx, control_rx))
    }

    /// Build and bind.
    pub async fn start(self) -> Result<Server> {
        let server = self.build()?;
        server.start().await?;
        Ok(server)
    }
}
