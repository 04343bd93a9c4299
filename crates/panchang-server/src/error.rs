use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a configuration key.
///
/// Keys arrive either as a full path (`server.port`) or, from serde, as a bare
/// field name. Every section but `provider` has defaults for all of its fields,
/// so a bare name always belongs to the provider.
pub fn to_env_var(field: &str) -> String {
    let path = if field.contains('.') {
        field.to_string()
    } else {
        format!("provider.{}", field)
    };
    format!("PANCHANG_{}", path.replace('.', "__").to_uppercase())
}
