use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;

/// Which command surface the dispatcher exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Luck value only: no omen details, leaderboard or steal.
    Basic,
    Advanced,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Mode::Basic),
            "advanced" => Ok(Mode::Advanced),
            other => Err(anyhow!("unknown LUCK_MODE: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub mode: Mode,
    pub leaderboard_size: u32,
    pub allow_delete: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Config {
            port: var_or("PORT", "3000").parse().context("PORT must be a number")?,
            db_path: var_or("DB_PATH", "data/luck_records_advanced.db"),
            mode: var_or("LUCK_MODE", "advanced").parse()?,
            leaderboard_size: parse_leaderboard_size(&var_or("LEADERBOARD_SIZE", "5"))?,
            allow_delete: parse_flag(&var_or("ALLOW_DELETE", "false"))?,
        })
    }
}

/// Cached configuration for the binaries. Library code takes its settings as arguments.
pub fn config() -> Result<&'static Config> {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    if let Some(conf) = CONFIG.get() {
        return Ok(conf);
    }
    let conf = Config::from_env()?;
    Ok(CONFIG.get_or_init(|| conf))
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_leaderboard_size(raw: &str) -> Result<u32> {
    let size: u32 = raw.trim().parse().context("LEADERBOARD_SIZE must be a number")?;
    if size == 0 {
        return Err(anyhow!("LEADERBOARD_SIZE must be at least 1"));
    }
    Ok(size)
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("invalid boolean flag: {}", other)),
    }
}
