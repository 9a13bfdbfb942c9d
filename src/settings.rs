use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::repositories::api::DEFAULT_BASE_URL;

#[derive(Debug, Deserialize)]
pub struct Api {
    pub base_url: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub api: Api,
}

impl Settings {
    /// Loads `path` if it exists, then `CLINICA_*` environment variables
    /// (`CLINICA_API__BASE_URL`, `CLINICA_API__ACCESS_TOKEN`, ...).
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("api.base_url", DEFAULT_BASE_URL)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("CLINICA").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
