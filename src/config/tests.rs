use super::*;
use std::fs;
use tempfile::TempDir;
use crate::memory::MemoryConfig;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn config_file_persistence() {
        let temp_dir = TempDir::new().expect("should create TempDir successfully");
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);

        let original_config = Config {
            ollama: OllamaConfig {
                protocol: "https".to_string(),
                host: "test-host".to_string(),
                port: 8080,
                batch_size: 32,
            },
            retrieval: RetrievalConfig { top_k: 7 },
            memory: MemoryConfig { max_turns: 0 },
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let toml_content = original_config
            .to_toml()
            .expect("config should convert to toml string successfully");
        fs::write(&config_path, toml_content).expect("should write to config_path successfully");

        let loaded_config = Config::load(temp_dir.path()).expect("should load config");

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn complete_valid_config() {
        let valid_toml = r#"
            [paths]
            data_dir = "corpus"
            models_dir = "weights"

            [model.llm]
            repo_id = "TheBloke/Llama-2-7B-Chat-GGUF"
            filename = "llama-2-7b-chat.Q4_K_M.gguf"
            n_ctx = 2048
            n_gpu_layers = 35

            [model.embedding]
            model = "nomic-embed-text:latest"
            dimension = 768

            [ollama]
            protocol = "http"
            host = "localhost"
            port = 11434
            batch_size = 64

            [generator]
            backend = "openai"
            model = "gpt-3.5-turbo-instruct"
            temperature = 0.2
            max_tokens = 512
            top_p = 0.9
            stream = false
            timeout_secs = 90

            [chunking]
            chunk_size = 800
            chunk_overlap = 100

            [retrieval]
            top_k = 4

            [memory]
            max_turns = 10

            [ingestion]
            fail_on_error = true

            [server]
            host = "0.0.0.0"
            port = 9000
        "#;

        let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
        assert!(config.validate().is_ok());
        assert_eq!(config.model.llm.n_gpu_layers, 35);
        assert_eq!(config.model.embedding.dimension, 768);
        assert_eq!(config.ollama.batch_size, 64);
        assert_eq!(config.generator.max_tokens, 512);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert!(config.ingestion.fail_on_error);
        assert_eq!(config.server_address(), "0.0.0.0:9000");
    }

    #[test]
    fn invalid_toml_handling() {
        let invalid_toml = r#"
            [ollama
            host = "localhost"
            port = "invalid_port"
        "#;

        let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result: Result<Config, toml::de::Error> =
            toml::from_str("[generator]\nbackend = \"carrier-pigeon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn show_config_includes_sections() {
        let config = Config::default();
        let rendered = show_config(&config).expect("should render config");

        assert!(rendered.starts_with("# base directory:"));
        assert!(rendered.contains("[generator]"));
        assert!(rendered.contains("[model.llm]"));
        assert!(rendered.contains("chunk_overlap = 200"));
    }

    #[test]
    fn error_display_messages() {
        let errors = vec![
            ConfigError::InvalidProtocol("ftp".to_string()),
            ConfigError::InvalidPort(0),
            ConfigError::InvalidBatchSize(0),
            ConfigError::InvalidModel(String::new()),
            ConfigError::InvalidUrl("invalid-url".to_string()),
            ConfigError::MissingApiKey(OPENAI_API_KEY_VAR),
        ];

        for error in errors {
            let message = format!("{error}");
            assert!(!message.is_empty());
            assert!(message.len() > 10);
        }
    }
}
