use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5000;

/// Connect, read and write timeout for every outbound connection
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings a node is started with
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host to listen on; also the host part of the advertised address
    pub host: String,

    /// Port to listen on; 0 picks a free port
    pub port: u16,

    /// Account credited with mining rewards; defaults to the node address
    pub miner_address: Option<String>,

    /// Peers to connect to at startup, as `host:port`
    pub bootstrap: Vec<String>,

    pub network_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            miner_address: None,
            bootstrap: Vec::new(),
            network_timeout: NETWORK_TIMEOUT,
        }
    }
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NodeConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_miner_address(mut self, miner_address: impl Into<String>) -> Self {
        self.miner_address = Some(miner_address.into());
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Vec<String>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_network_timeout(mut self, network_timeout: Duration) -> Self {
        self.network_timeout = network_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5000);
        assert!(config.miner_address.is_none());
        assert!(config.bootstrap.is_empty());
        assert_eq!(config.network_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builders() {
        let config = NodeConfig::new("127.0.0.1", 0)
            .with_miner_address("alice")
            .with_bootstrap(vec!["127.0.0.1:5001".to_string()])
            .with_network_timeout(Duration::from_secs(2));

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.miner_address.as_deref(), Some("alice"));
        assert_eq!(config.bootstrap, vec!["127.0.0.1:5001"]);
        assert_eq!(config.network_timeout, Duration::from_secs(2));
    }
}
