#[derive(Debug, thiserror::Error)]
pub enum AdaptError {
    #[error("`{0}` does not expose an introspectable field list")]
    NotIntrospectable(&'static str),

    #[error("override `{field}` is not a declared field of `{type_name}`")]
    UndeclaredOverride {
        type_name: &'static str,
        field: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Schema error: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Adaptation error: {0}")]
    Adapt(#[from] AdaptError),
}
