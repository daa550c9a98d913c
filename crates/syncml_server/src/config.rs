//! Server configuration.

use syncml_engine::EngineConfig;

/// Configuration for the sync server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// URI clients should send their next message to, echoed as `<RespURI>`.
    pub resp_uri: Option<String>,
    /// Secret mixed into session keys. Without one keys are plain SHA-256.
    pub session_secret: Option<Vec<u8>>,
    /// Engine settings.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Creates a configuration with engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response URI.
    pub fn with_resp_uri(mut self, uri: impl Into<String>) -> Self {
        self.resp_uri = Some(uri.into());
        self
    }

    /// Keys sessions with HMAC-SHA256 under `secret`.
    pub fn with_session_secret(mut self, secret: Vec<u8>) -> Self {
        self.session_secret = Some(secret);
        self
    }

    /// Replaces the engine settings.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert!(config.resp_uri.is_none());
        assert!(config.session_secret.is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_resp_uri("http://sync.example.com/rpc")
            .with_session_secret(vec![1, 2, 3, 4])
            .with_engine(EngineConfig::default().with_max_message_size(4_000));

        assert_eq!(config.resp_uri.as_deref(), Some("http://sync.example.com/rpc"));
        assert_eq!(config.session_secret, Some(vec![1, 2, 3, 4]));
        assert_eq!(config.engine.max_message_size, 4_000);
    }
}
