// Configuration management module
// TOML file plus environment overrides, built once at process entry

pub mod settings;

pub use settings::{
    CONTEXT_SLOT, Config, ConfigError, ModelConfig, QUESTION_SLOT, RetrievalConfig,
    StorageBackend, StorageConfig, TelegramConfig, validate_prompt_template,
};

/// Print the effective configuration with secrets masked
#[inline]
pub fn show_config(config: &Config) -> Result<(), ConfigError> {
    match Config::config_dir() {
        Some(dir) => eprintln!("Default config file: {}", dir.join("config.toml").display()),
        None => eprintln!("Default config file: unavailable on this platform"),
    }
    println!("{}", config.redacted().to_toml()?);
    Ok(())
}
