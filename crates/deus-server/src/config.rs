use std::env;
use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expires_in: i64,
    pub refresh_token_expires_in: i64,
    pub reset_token_expires_in: i64,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = var_or("PORT", "3000")
            .parse()
            .context("PORT must be a port number")?;
        let max_upload_mb: usize = var_or("MAX_UPLOAD_MB", "3")
            .parse()
            .context("MAX_UPLOAD_MB must be a whole number")?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_expires_in: var_or("JWT_EXPIRES_IN", "900") // 15 minutes
                .parse()
                .context("JWT_EXPIRES_IN must be seconds")?,
            refresh_token_expires_in: var_or("REFRESH_TOKEN_EXPIRES_IN", "604800") // 7 days
                .parse()
                .context("REFRESH_TOKEN_EXPIRES_IN must be seconds")?,
            reset_token_expires_in: var_or("RESET_TOKEN_EXPIRES_IN", "3600")
                .parse()
                .context("RESET_TOKEN_EXPIRES_IN must be seconds")?,
            port,
            storage_dir: PathBuf::from(var_or("STORAGE_DIR", "./storage")),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }

    /// Public URL of a stored object.
    pub fn media_url(&self, path: &str) -> String {
        format!("{}/media/{}", self.public_base_url, path)
    }
}
