pub mod schema;

pub use schema::{Config, GatewayConfig, GeminiConfig, HistoryConfig, LineConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();
        assert!(config.line.channel_secret.is_none());
        assert_eq!(config.history.max_messages, 10);
    }
}
