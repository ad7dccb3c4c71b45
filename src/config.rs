use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_ADDR: &str = "0.0.0.0:3146";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_LANGUAGE: &str = "ru-RU";

/// Credentials and local settings read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_language: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub data_dir: PathBuf,
    pub addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing or malformed
    /// credentials are an error; optional settings fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("Missing required environment variable: {}", key))
        };

        let tmdb_api_key = required("TMDB_API_KEY")?;
        let supabase_url = required("SUPABASE_URL")?;
        let supabase_anon_key = required("SUPABASE_ANON_KEY")?;

        if !supabase_url.starts_with("https://") {
            bail!("Invalid SUPABASE_URL: must be a valid HTTPS URL");
        }
        let supabase_url = supabase_url.trim_end_matches('/').to_string();

        let tmdb_language = lookup("TMDB_LANGUAGE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let data_dir = lookup("CINEDECK_DATA_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let addr = lookup("CINEDECK_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("CINEDECK_ADDR must be a socket address like 127.0.0.1:3146")?;

        Ok(Self {
            tmdb_api_key,
            tmdb_language,
            supabase_url,
            supabase_anon_key,
            data_dir,
            addr,
        })
    }
}
