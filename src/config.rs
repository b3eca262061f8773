use std::path::PathBuf;

use anyhow::Context;

// === Content policy ===
pub const MAX_POST_LENGTH: usize = 140;
pub const DENYLIST: [&str; 3] = ["kerfuffle", "sharbert", "fornax"];
pub const DENYLIST_MASK: &str = "****";

// === Tokens ===
pub const ACCESS_TOKEN_ISSUER: &str = "peep-access";
pub const REFRESH_TOKEN_ISSUER: &str = "peep-refresh";
pub const ACCESS_TOKEN_EXPIRATION_HOURS: i64 = 1;
pub const REFRESH_TOKEN_EXPIRATION_HOURS: i64 = 1440;

// === Webhooks ===
pub const UPGRADE_EVENT: &str = "user.upgraded";

// === Runtime ===
pub const DEFAULT_DATABASE_PATH: &str = "database.json";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub jwt_secret: String,
    pub webhook_key: String,
    pub bind_addr: String,
}

impl Config {
    /// Reads the configuration from the environment, after loading `.env` if one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path = std::env::var("PEEP_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE_PATH));
        let bind_addr =
            std::env::var("PEEP_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        Ok(Config {
            database_path,
            jwt_secret: required_var("PEEP_JWT_SECRET")?,
            webhook_key: required_var("PEEP_WEBHOOK_KEY")?,
            bind_addr,
        })
    }
}

fn required_var(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name).with_context(|| format!("{} must be set", name))?;
    if value.is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    Ok(value)
}
