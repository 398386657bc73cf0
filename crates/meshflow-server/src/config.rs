use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Secrets that ship in sample `.env` files and must never reach a deployment.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

#[derive(Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub broadcast_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var_or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.into());

        let jwt_secret = var("MESHFLOW_JWT_SECRET").context("MESHFLOW_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("MESHFLOW_JWT_SECRET is a placeholder; set a real secret");
        }

        let broadcast_capacity: usize = var_or("MESHFLOW_BROADCAST_CAPACITY", "1024")
            .parse()
            .context("MESHFLOW_BROADCAST_CAPACITY must be a positive integer")?;
        if broadcast_capacity == 0 {
            bail!("MESHFLOW_BROADCAST_CAPACITY must be a positive integer");
        }

        Ok(Self {
            db_path: PathBuf::from(var_or("MESHFLOW_DB_PATH", "meshflow.db")),
            host: var_or("MESHFLOW_HOST", "0.0.0.0"),
            port: var_or("MESHFLOW_PORT", "8000")
                .parse()
                .context("MESHFLOW_PORT must be a port number")?,
            jwt_secret,
            broadcast_capacity,
        })
    }
}
