//! Transport construction and eager configuration validation
//!
//! Configuration mistakes surface here, when a config is turned into a
//! transport, never later during `send_request`. The factory is behind the
//! [`CreateTransport`] trait so the pool (and tests) can inject their own
//! construction strategy.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::config::{Endpoint, TransportConfig};
use crate::error::TransportError;
use crate::transport::{
    ContainerTransport, HttpTransport, SshTransport, StdioTransport, Transport,
};

/// Construction seam between configuration and live transports
pub trait CreateTransport: Send + Sync {
    /// Validate `config` and build a transport for it
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Default factory building the four built-in transport kinds
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportFactory;

impl TransportFactory {
    pub fn new() -> Self {
        Self
    }

    /// Check every kind-specific required field before any I/O happens
    pub fn validate_config(config: &TransportConfig) -> Result<(), TransportError> {
        match &config.endpoint {
            Endpoint::Stdio(stdio) => {
                require(&stdio.command, "stdio transport requires a command")?;
            }
            Endpoint::Ssh(ssh) => {
                require(&ssh.host, "ssh transport requires a host")?;
                require(&ssh.username, "ssh transport requires a username")?;
                require(&ssh.command, "ssh transport requires a remote command")?;
                if ssh.password.is_none() && ssh.private_key_path.is_none() {
                    return Err(TransportError::configuration(
                        "ssh transport requires a password or a private key path",
                    ));
                }
            }
            Endpoint::Container(container) => {
                require(&container.engine, "container transport requires an engine")?;
                require(
                    &container.container,
                    "container transport requires a container name",
                )?;
                require(&container.command, "container transport requires a command")?;
            }
            Endpoint::Http(http) => {
                require(&http.base_url, "http transport requires a base url")?;
                let url = Url::parse(&http.base_url).map_err(|err| {
                    TransportError::configuration(format!("invalid base url: {}", err))
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(TransportError::configuration(format!(
                        "unsupported url scheme: {}",
                        url.scheme()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate and construct; the transport is returned disconnected
    pub fn create_transport(
        &self,
        config: &TransportConfig,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        Self::validate_config(config)?;
        debug!(kind = %config.kind(), "creating transport");

        let transport: Arc<dyn Transport> = match config.endpoint {
            Endpoint::Stdio(_) => Arc::new(StdioTransport::new(config.clone())?),
            Endpoint::Ssh(_) => Arc::new(SshTransport::new(config.clone())?),
            Endpoint::Container(_) => Arc::new(ContainerTransport::new(config.clone())?),
            Endpoint::Http(_) => Arc::new(HttpTransport::new(config.clone())?),
        };
        Ok(transport)
    }
}

impl CreateTransport for TransportFactory {
    fn create(&self, config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
        self.create_transport(config)
    }
}

fn require(value: &str, message: &str) -> Result<(), TransportError> {
    if value.trim().is_empty() {
        Err(TransportError::configuration(message))
    } else {
        Ok(())
    }
}
