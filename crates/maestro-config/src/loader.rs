// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::{Config, DbDriver};

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/maestro/config.yaml"));
        paths.push(home.join(".config/maestro/config.yml"));
    }

    paths.push(PathBuf::from(".maestro.yaml"));
    paths.push(PathBuf::from(".maestro.yml"));
    paths.push(PathBuf::from("maestro.yaml"));
    paths.push(PathBuf::from("maestro.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then applying
/// environment overrides. `extra` may provide an explicit path (`--config`).
///
/// Recognised environment variables:
/// - `MAESTRO_PORT` / `SERVER_PORT` — listen port
/// - `MAESTRO_DB` — persistence driver (`memory` | `sqlite` | `postgres`)
/// - `DATABASE_URL` — connection URL for network drivers
/// - `MAESTRO_BASE_URL` — base URL for outbound references
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_yaml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        merge_yaml(&mut merged, read_layer(p)?);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserializing merged config")?
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn apply_env_overrides(config: &mut Config) {
    let port = std::env::var("MAESTRO_PORT")
        .or_else(|_| std::env::var("SERVER_PORT"))
        .ok()
        .and_then(|v| v.parse::<u16>().ok());
    if let Some(p) = port {
        config.server.port = p;
    }
    if let Ok(raw) = std::env::var("MAESTRO_DB") {
        match raw.parse::<DbDriver>() {
            Ok(driver) => config.db.driver = driver,
            Err(e) => debug!("ignoring MAESTRO_DB: {e}"),
        }
    }
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.db.url = Some(url);
    }
    if let Ok(base) = std::env::var("MAESTRO_BASE_URL") {
        config.server.base_url = Some(base);
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_overrides() {
        let mut dst = val("server:\n  port: 1000");
        merge_yaml(&mut dst, val("server:\n  port: 2000"));
        let c: Config = serde_yaml::from_value(dst).unwrap();
        assert_eq!(c.server.port, 2000);
    }

    #[test]
    fn merge_keeps_unrelated_keys() {
        let mut dst = val("server:\n  port: 1000");
        merge_yaml(&mut dst, val("db:\n  driver: sqlite"));
        let c: Config = serde_yaml::from_value(dst).unwrap();
        assert_eq!(c.server.port, 1000);
        assert_eq!(c.db.driver, DbDriver::Sqlite);
    }

    #[test]
    fn explicit_path_loads_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "server:\n  port: 9321").unwrap();
        let c = load(Some(f.path())).unwrap();
        // Env may override in CI; only assert when the vars are absent.
        if std::env::var("MAESTRO_PORT").is_err() && std::env::var("SERVER_PORT").is_err() {
            assert_eq!(c.server.port, 9321);
        }
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/maestro.yaml"))).is_err());
    }
}
