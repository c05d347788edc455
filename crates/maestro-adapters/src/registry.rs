// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::{ClaudeAdapter, CodexAdapter, GenericAdapter, ProviderAdapter};

/// Collapse a user-supplied provider identifier to its canonical form.
///
/// Lower-cases and folds the known synonyms; anything unrecognised maps to
/// `"generic"`.
pub fn canonical_provider_id(provider: &str) -> &'static str {
    match provider.trim().to_ascii_lowercase().as_str() {
        "claude" | "claude-code" | "claude_code" | "claudecode" => "claude",
        "codex" | "codex-cli" | "openai-codex" => "codex",
        _ => "generic",
    }
}

/// Resolve the adapter for a provider identifier.
///
/// Adapter instances are stateless and memoised process-wide; repeated
/// lookups return the same `Arc`.
pub fn adapter_for(provider: &str) -> Arc<dyn ProviderAdapter> {
    static ADAPTERS: OnceLock<HashMap<&'static str, Arc<dyn ProviderAdapter>>> = OnceLock::new();
    let adapters = ADAPTERS.get_or_init(|| {
        let mut m: HashMap<&'static str, Arc<dyn ProviderAdapter>> = HashMap::new();
        m.insert("claude", Arc::new(ClaudeAdapter));
        m.insert("codex", Arc::new(CodexAdapter));
        m.insert("generic", Arc::new(GenericAdapter));
        m
    });
    adapters
        .get(canonical_provider_id(provider))
        .cloned()
        .unwrap_or_else(|| adapters["generic"].clone())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_collapse() {
        assert_eq!(canonical_provider_id("claude"), "claude");
        assert_eq!(canonical_provider_id("Claude-Code"), "claude");
        assert_eq!(canonical_provider_id("claudecode"), "claude");
        assert_eq!(canonical_provider_id("codex-cli"), "codex");
    }

    #[test]
    fn unknown_resolves_to_generic() {
        assert_eq!(canonical_provider_id("unheard-of"), "generic");
        assert_eq!(adapter_for("unheard-of").id(), "generic");
    }

    #[test]
    fn instances_are_memoised() {
        let a = adapter_for("claude");
        let b = adapter_for("claude-code");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn behavior_split_between_adapters() {
        assert!(adapter_for("claude").behavior().immediate_input);
        assert!(!adapter_for("codex").behavior().immediate_input);
    }
}
