// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use maestro_types::{SessionRole, Tunables};
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    4517
}

fn default_db_driver() -> DbDriver {
    DbDriver::Memory
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub db: DbConfig,
    /// Upstream specialist binaries, keyed by provider id.
    ///
    /// ```yaml
    /// providers:
    ///   claude:
    ///     command: claude-agent
    ///     args: ["--acp"]
    ///     auth_token_env: CLAUDE_AUTH_TOKEN
    ///   codex:
    ///     command: codex
    ///     args: ["proto"]
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderSpec>,
    /// Named specialist presets referenced when creating sessions and when
    /// the orchestrator delegates.
    #[serde(default)]
    pub specialists: HashMap<String, SpecialistPreset>,
    /// Default provider/model per role, used by the orchestrator when a
    /// delegation names only a role.
    #[serde(default)]
    pub roles: RoleDefaults,
    #[serde(default)]
    pub tunables: Tunables,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Base URL advertised to clients for outbound references.
    pub base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port(), base_url: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub driver: DbDriver,
    /// Connection URL for network drivers; ignored by `memory`.
    pub url: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { driver: default_db_driver(), url: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbDriver {
    Memory,
    Sqlite,
    Postgres,
}

impl std::str::FromStr for DbDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown db driver: {other}")),
        }
    }
}

/// How to launch one upstream specialist process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Environment variable whose value is passed through to the child as
    /// its credential (read at spawn time, never stored in config).
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

/// A named configuration applied when creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistPreset {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub role: Option<SessionRole>,
    /// Pre-built system prompt header for sessions using this preset.
    #[serde(default)]
    pub system_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleTarget {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleDefaults {
    pub coordinator: RoleTarget,
    pub implementor: RoleTarget,
    pub verifier: RoleTarget,
    pub solo: RoleTarget,
}

impl Default for RoleDefaults {
    fn default() -> Self {
        let generic = RoleTarget { provider: "generic".into(), model: None };
        Self {
            coordinator: generic.clone(),
            implementor: generic.clone(),
            verifier: generic.clone(),
            solo: generic,
        }
    }
}

impl RoleDefaults {
    pub fn for_role(&self, role: SessionRole) -> &RoleTarget {
        match role {
            SessionRole::Coordinator => &self.coordinator,
            SessionRole::Implementor => &self.implementor,
            SessionRole::Verifier => &self.verifier,
            SessionRole::Solo => &self.solo,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
