use thiserror::Error;

/// Crate-wide result type.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Container registry
    // =========
    #[error("Container already registered for `{0}`")]
    ContainerExists(&'static str),

    #[error("No container registered for `{0}`")]
    ContainerNotRegistered(&'static str),

    #[error("Unsupported primary-key arity {arity} for `{table}` (1 to 3 keys including the owner id)")]
    UnsupportedKeyArity { table: &'static str, arity: usize },

    // =========
    // Database
    // =========
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    // =========
    // Loader
    // =========
    #[error("Batched select failed for `{table}`: {message}")]
    LoadFailed { table: &'static str, message: String },

    #[error("Timed out waiting for `{table}` rows of owner {sid}")]
    LoadTimeout { table: &'static str, sid: u32 },

    #[error("Loader for `{table}` is shut down")]
    LoaderClosed { table: &'static str },

    // =========
    // Metrics / Prometheus
    // =========
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
}
