// Configuration management module
// TOML settings plus the environment lookups the generator backends need

pub mod settings;

#[cfg(test)]
mod tests;

pub use settings::{
    CONFIG_FILE_NAME, Config, ConfigError, EmbeddingBackend, EmbeddingModelConfig, IngestionConfig,
    LlmArtifactConfig, ModelConfig, OPENAI_API_KEY_VAR, OllamaConfig, PathsConfig,
    RetrievalConfig, ServerConfig,
};

/// Render the effective configuration, as loaded, for `thesia config`
#[inline]
pub fn show_config(config: &Config) -> Result<String, ConfigError> {
    let mut rendered = format!("# base directory: {}\n", config.get_base_dir().display());
    rendered.push_str(&config.to_toml()?);
    Ok(rendered)
}
