use super::*;
use serial_test::serial;
use std::collections::HashMap;
use tempfile::TempDir;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.storage.backend, StorageBackend::Local);
    assert_eq!(config.storage.documents_key, "juridicos.zip");
    assert_eq!(config.storage.index_folder, "chroma_index");
    assert_eq!(config.models.batch_size, 16);
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.request_timeout_secs, 60);
    assert!(config.telegram.bot_token.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.storage.bucket = "  ".to_string();
    assert!(matches!(invalid_config.validate(), Err(ConfigError::EmptyBucket)));

    let mut invalid_config = config.clone();
    invalid_config.storage.backend = StorageBackend::Http;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::MissingStorageEndpoint)
    ));

    let mut invalid_config = config.clone();
    invalid_config.models.endpoint = "ftp://models".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.models.embedding_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.models.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(matches!(invalid_config.validate(), Err(ConfigError::InvalidTopK(0))));

    let mut invalid_config = config.clone();
    invalid_config.request_timeout_secs = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.retrieval.prompt_template = "Question: {question}".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidPromptTemplate(CONTEXT_SLOT))
    ));
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = config.to_toml().expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial_toml = r#"
        [storage]
        bucket = "legal-bucket"

        [retrieval]
        top_k = 5
    "#;

    let config: Config = toml::from_str(partial_toml).expect("should parse partial toml");

    assert_eq!(config.storage.bucket, "legal-bucket");
    assert_eq!(config.storage.documents_key, "juridicos.zip");
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.models, ModelConfig::default());
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [storage
        bucket = "x"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn environment_overrides() {
    let mut config = Config::default();
    config
        .apply_env(lookup_from(&[
            (ENV_BUCKET_NAME, "legal-bucket"),
            (ENV_DOCUMENTS_KEY, "docs.zip"),
            (ENV_INDEX_FOLDER, "indexes/v2"),
            (ENV_TELEGRAM_BOT_TOKEN, "123:abc"),
            (ENV_MODEL_ENDPOINT, "https://models.example.com"),
            (ENV_EMBEDDING_MODEL, "titan-embed"),
            (ENV_GENERATION_MODEL, "titan-text"),
        ]))
        .expect("should apply overrides");

    assert_eq!(config.storage.bucket, "legal-bucket");
    assert_eq!(config.storage.documents_key, "docs.zip");
    assert_eq!(config.storage.index_folder, "indexes/v2");
    assert_eq!(config.telegram.bot_token.as_deref(), Some("123:abc"));
    assert_eq!(config.models.endpoint, "https://models.example.com");
    assert_eq!(config.models.embedding_model, "titan-embed");
    assert_eq!(config.models.generation_model, "titan-text");
    assert!(config.validate().is_ok());
}

#[test]
fn storage_endpoint_switches_to_http_backend() {
    let mut config = Config::default();
    config
        .apply_env(lookup_from(&[(ENV_STORAGE_ENDPOINT, "http://localhost:9000")]))
        .expect("should apply overrides");

    assert_eq!(config.storage.backend, StorageBackend::Http);
    assert!(config.validate().is_ok());
}

#[test]
fn blank_environment_values_are_ignored() {
    let mut config = Config::default();
    config
        .apply_env(lookup_from(&[(ENV_BUCKET_NAME, "   ")]))
        .expect("should apply overrides");

    assert_eq!(config.storage.bucket, "docs-rag");
}

#[test]
fn invalid_backend_is_rejected() {
    let mut config = Config::default();
    let result = config.apply_env(lookup_from(&[(ENV_STORAGE_BACKEND, "ftp")]));

    assert!(matches!(result, Err(ConfigError::InvalidBackend(_))));
    assert_eq!("HTTP".parse::<StorageBackend>().ok(), Some(StorageBackend::Http));
}

#[test]
fn load_reads_explicit_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        request_timeout_secs = 15

        [models]
        batch_size = 8
        "#,
    )
    .expect("should write config");

    let config = Config::from_file(&path).expect("should load config");

    assert_eq!(config.request_timeout_secs, 15);
    assert_eq!(config.models.batch_size, 8);
}

#[test]
fn load_fails_for_missing_explicit_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("missing.toml");

    let result = Config::load(Some(&path));

    assert!(matches!(result, Err(ConfigError::MissingFile(_))));
}

#[test]
#[serial]
fn load_applies_process_environment() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[storage]\nbucket = \"from-file\"\n").expect("should write config");

    // SAFETY: serialized with every other test that touches the process environment
    unsafe { std::env::set_var(ENV_BUCKET_NAME, "from-env") };
    let result = Config::load(Some(&path));
    // SAFETY: as above
    unsafe { std::env::remove_var(ENV_BUCKET_NAME) };

    let config = result.expect("should load config");
    assert_eq!(config.storage.bucket, "from-env");
}

#[test]
fn model_ranges_are_validated() {
    let mut models = ModelConfig {
        batch_size: 1000,
        temperature: 2.0,
        ..ModelConfig::default()
    };
    assert!(models.validate().is_ok());

    models.batch_size = 1001;
    assert!(matches!(
        models.validate(),
        Err(ConfigError::InvalidBatchSize(1001))
    ));

    models.batch_size = 128;
    models.temperature = 3.5;
    assert!(matches!(
        models.validate(),
        Err(ConfigError::InvalidTemperature(_))
    ));
}

#[test]
fn redacted_masks_token() {
    let mut config = Config::default();
    config.telegram.bot_token = Some("secret".to_string());

    let redacted = config.redacted();

    assert_eq!(redacted.telegram.bot_token.as_deref(), Some("********"));
    assert!(!redacted.to_toml().expect("should serialize").contains("secret"));
}

#[test]
fn bot_token_must_be_present_and_not_blank() {
    let mut config = TelegramConfig::default();
    assert!(matches!(config.token(), Err(ConfigError::MissingBotToken)));

    config.bot_token = Some("  ".to_string());
    assert!(matches!(config.token(), Err(ConfigError::MissingBotToken)));

    config.bot_token = Some("123:abc".to_string());
    assert_eq!(config.token().expect("should have token"), "123:abc");
    assert_eq!(
        config.api_url().expect("should parse").host_str(),
        Some("api.telegram.org")
    );
}
