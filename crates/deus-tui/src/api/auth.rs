use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use deus_shared::api::AuthResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: Uuid,
}

impl From<AuthResponse> for AuthTokens {
    fn from(auth: AuthResponse) -> Self {
        Self {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            user_id: auth.user_id,
        }
    }
}

impl AuthTokens {
    fn token_path() -> Result<PathBuf> {
        Ok(super::config_dir()?.join("auth.json"))
    }

    pub fn load() -> Result<Option<Self>> {
        let path = Self::token_path()?;

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).context("Could not read auth file")?;
        let tokens: Self =
            serde_json::from_str(&contents).context("Could not parse auth file")?;

        Ok(Some(tokens))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::token_path()?;
        let contents = serde_json::to_string_pretty(self).context("Could not serialize tokens")?;

        fs::write(&path, contents).context("Could not write auth file")?;

        Ok(())
    }

    pub fn delete() -> Result<()> {
        let path = Self::token_path()?;

        if path.exists() {
            fs::remove_file(&path).context("Could not delete auth file")?;
        }

        Ok(())
    }
}
