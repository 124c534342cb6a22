//! # Configuration Loading
//!
//! TOML files on disk through to a running engine.

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use swarm_correlation::{
        channel, ConfigError, CorrelationConfig, CorrelationEngine, MatchStrategy, MqMessage,
        SweepMode,
    };

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(
            r#"
            default_timeout = "250ms"
            listener_count = 3
            match_strategy = { kind = "property", name = "trace_token" }

            [sweeper]
            mode = "periodic"
            max_lateness = "5ms"
            "#,
        );

        let config = CorrelationConfig::load(file.path()).unwrap();
        assert_eq!(config.default_timeout, Duration::from_millis(250));
        assert_eq!(config.listener_count, 3);
        assert_eq!(
            config.match_strategy,
            MatchStrategy::Property {
                name: "trace_token".into()
            }
        );
        assert_eq!(config.sweeper.mode, SweepMode::Periodic);
        assert_eq!(config.sweeper.max_lateness, Duration::from_millis(5));
        // Unset keys keep their defaults
        assert_eq!(config.sweeper.idle_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = CorrelationConfig::load("/nonexistent/swarm.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("listener_count = 0\n");
        assert!(matches!(
            CorrelationConfig::load(file.path()),
            Err(ConfigError::InvalidListeners(_))
        ));
    }

    #[tokio::test]
    async fn test_loaded_config_drives_engine() {
        let file = write_config(
            r#"
            default_timeout = "2s"
            match_strategy = { kind = "correlation_id" }
            "#,
        );
        let config = CorrelationConfig::load(file.path()).unwrap();

        let (outbound, _requests) = channel::<MqMessage>(8);
        let engine = CorrelationEngine::builder(Arc::new(outbound))
            .config(config)
            .build()
            .unwrap();

        assert_eq!(engine.matcher_name(), "correlation_id");
        assert_eq!(engine.config().default_timeout, Duration::from_secs(2));
        engine.shutdown().await;
    }
}
