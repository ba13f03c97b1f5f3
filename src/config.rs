#![forbid(unsafe_code)]

//! Runtime configuration for the tunebridge backend.
//!
//! Values are resolved from four layers, highest precedence first: explicit
//! CLI overrides, process environment variables, a `.env`-style file, and
//! built-in defaults. Blank values at any layer count as unset.

use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use url::Url;

use crate::providers::ProviderKind;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

// Community mirrors tried in order by the failover scan. Overridable via the
// *_MIRRORS variables when an instance dies or a closer one exists.
pub const DEFAULT_SAAVN_MIRRORS: &[&str] = &[
    "https://saavn.dev",
    "https://jiosaavn-api-pink.vercel.app",
];
pub const DEFAULT_PIPED_MIRRORS: &[&str] = &[
    "https://pipedapi.kavin.rocks",
    "https://pipedapi.adminforge.de",
    "https://api.piped.yt",
];
pub const DEFAULT_INVIDIOUS_MIRRORS: &[&str] = &[
    "https://yewtu.be",
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
];

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub www_root: PathBuf,
    pub provider: ProviderKind,
    pub saavn_mirrors: Vec<Url>,
    pub piped_mirrors: Vec<Url>,
    pub invidious_mirrors: Vec<Url>,
    pub jamendo_client_id: Option<String>,
    pub cache_ttl: Duration,
}

/// Values a binary may pin before the env/file layers are consulted.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub provider: Option<ProviderKind>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    resolve_runtime_config(RuntimeOverrides::default())
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let host = overrides
        .host
        .and_then(non_blank)
        .or_else(|| lookup_value("TUNEBRIDGE_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TUNEBRIDGE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let www_root = overrides
        .www_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("WWW_ROOT", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("WWW_ROOT not set"))?;
    let provider = match overrides.provider {
        Some(kind) => kind,
        None => match lookup_value("TUNEBRIDGE_PROVIDER", file_vars, &env_lookup) {
            Some(raw) => ProviderKind::parse(&raw)
                .ok_or_else(|| anyhow!("unknown provider: {raw}"))?,
            None => ProviderKind::Saavn,
        },
    };

    let saavn_mirrors = mirror_list(
        "SAAVN_MIRRORS",
        DEFAULT_SAAVN_MIRRORS,
        file_vars,
        &env_lookup,
    )?;
    let piped_mirrors = mirror_list(
        "PIPED_MIRRORS",
        DEFAULT_PIPED_MIRRORS,
        file_vars,
        &env_lookup,
    )?;
    let invidious_mirrors = mirror_list(
        "INVIDIOUS_MIRRORS",
        DEFAULT_INVIDIOUS_MIRRORS,
        file_vars,
        &env_lookup,
    )?;

    let jamendo_client_id =
        lookup_value("JAMENDO_CLIENT_ID", file_vars, &env_lookup).and_then(non_blank);

    let cache_ttl_secs = lookup_value("TUNEBRIDGE_CACHE_TTL_SECS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CACHE_TTL_SECS);

    Ok(RuntimeConfig {
        host,
        port,
        www_root: PathBuf::from(www_root),
        provider,
        saavn_mirrors,
        piped_mirrors,
        invidious_mirrors,
        jamendo_client_id,
        cache_ttl: Duration::from_secs(cache_ttl_secs),
    })
}

/// Parses a comma-separated list of base URLs, falling back to the built-in
/// defaults when the variable is absent or blank.
fn mirror_list(
    key: &str,
    defaults: &[&str],
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Vec<Url>> {
    let raw = lookup_value(key, file_vars, env_lookup).and_then(non_blank);
    match raw {
        Some(list) => parse_mirror_list(&list).with_context(|| format!("parsing {key}")),
        None => parse_mirror_list(&defaults.join(",")),
    }
}

pub fn parse_mirror_list(raw: &str) -> Result<Vec<Url>> {
    let mut mirrors = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let url = Url::parse(entry).with_context(|| format!("invalid mirror URL: {entry}"))?;
        mirrors.push(url);
    }
    if mirrors.is_empty() {
        return Err(anyhow!("mirror list is empty"));
    }
    Ok(mirrors)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
