//! Unit tests for configuration.

#[cfg(test)]
mod path_expansion_tests {
    use super::super::Config;
    use std::path::PathBuf;

    #[test]
    fn expand_path_handles_tilde() {
        let result = Config::expand_path("~/test");
        assert!(!result.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn expand_path_handles_absolute_path() {
        let result = Config::expand_path("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn expand_path_handles_env_vars() {
        temp_env::with_var("QUILL_TEST_VAR", Some("/test/path"), || {
            let result = Config::expand_path("$QUILL_TEST_VAR/subdir");
            assert!(result.to_string_lossy().contains("/test/path"));
        });
    }
}

#[cfg(test)]
mod default_config_tests {
    use super::super::Config;

    #[test]
    fn default_has_database_path() {
        let config = Config::default();
        assert!(config.database.to_string_lossy().contains("quill"));
        assert!(config.database.to_string_lossy().ends_with(".db"));
    }

    #[test]
    fn default_chunk_sizes() {
        let config = Config::default();
        assert_eq!(config.chunking.target_chunk_size, 800);
        assert_eq!(config.chunking.max_chunk_size, 1200);
        assert_eq!(config.chunking.min_chunk_size, 400);
        assert!(config.chunking.validate().is_ok());
    }

    #[test]
    fn default_fallback_policy() {
        let config = Config::default();
        assert_eq!(config.fallback.failure_threshold, 3);
        assert_eq!(config.fallback.probe_interval, 10);
    }

    #[test]
    fn default_seeds_demo_user() {
        let config = Config::default();
        assert!(config.bootstrap.seed_user);
        assert_eq!(config.bootstrap.username, "demo");
    }
}

#[cfg(test)]
mod chunker_config_tests {
    use super::super::ChunkerConfig;

    #[test]
    fn rejects_min_above_target() {
        let config = ChunkerConfig {
            target_chunk_size: 100,
            max_chunk_size: 200,
            min_chunk_size: 150,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_min() {
        let config = ChunkerConfig {
            min_chunk_size: 0,
            ..ChunkerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

#[cfg(test)]
mod config_file_tests {
    use super::super::Config;
    use std::path::PathBuf;

    #[test]
    fn toml_roundtrip() {
        let mut config = Config::default();
        config.database = PathBuf::from("/test/quill.db");
        config.fallback.failure_threshold = 7;
        config.bootstrap.seed_user = false;

        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");

        assert_eq!(parsed.database, config.database);
        assert_eq!(parsed.fallback, config.fallback);
        assert_eq!(parsed.bootstrap, config.bootstrap);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chunking]\nmin_chunk_size = 200\n").expect("write");

        let config = Config::load_from_path(&path).expect("load");
        assert_eq!(config.chunking.min_chunk_size, 200);
        assert_eq!(config.chunking.max_chunk_size, 1200);
        assert_eq!(config.fallback.probe_interval, 10);
    }

    #[test]
    fn invalid_chunk_sizes_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chunking]\nmin_chunk_size = 5000\n").expect("write");

        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn ensure_at_creates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::ensure_at(&path).expect("ensure");
        assert!(path.exists());
        assert_eq!(config.chunking.target_chunk_size, 800);
    }
}
