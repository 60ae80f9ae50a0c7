use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::de::DeserializeOwned;

/// Load a layered configuration.
///
/// Sources, lowest precedence first: an optional `{file_name}.{toml,yaml,json}`
/// file, then `{prefix}__SECTION__KEY` environment variables. A `.env` file is
/// honoured if present.
pub fn load<T: DeserializeOwned>(file_name: &str, prefix: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name(file_name).required(false))
        .add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
