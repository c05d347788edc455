// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

/// Best-effort snapshot of the working copy at trace time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsContext {
    pub branch: String,
    pub dirty: bool,
}

/// Capture the current branch and dirty flag for `cwd`.
///
/// Failures (no git, not a repository, timeout) return `None`; trace
/// recording must never block on this.
pub async fn vcs_snapshot(cwd: &Path, budget: Duration) -> Option<VcsContext> {
    let branch = git_output(cwd, &["rev-parse", "--abbrev-ref", "HEAD"], budget).await?;
    let status = git_output(cwd, &["status", "--porcelain"], budget).await?;
    Some(VcsContext {
        branch: branch.trim().to_string(),
        dirty: !status.trim().is_empty(),
    })
}

async fn git_output(cwd: &Path, args: &[&str], budget: Duration) -> Option<String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let result = tokio::time::timeout(budget, cmd.output()).await;
    match result {
        Ok(Ok(out)) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("git not runnable: {e}");
            None
        }
        Err(_) => {
            debug!(?args, "git call timed out");
            None
        }
    }
}

const PATH_KEYS: &[&str] = &["path", "file_path", "filePath", "file", "filename"];

/// Mine file paths from a tool-call input object.
pub fn file_paths_from_input(input: &Value) -> Vec<String> {
    let Some(obj) = input.as_object() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for key in PATH_KEYS {
        if let Some(s) = obj.get(*key).and_then(Value::as_str) {
            if !out.iter().any(|e| e == s) {
                out.push(s.to_string());
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_known_path_keys() {
        let input = json!({"file_path": "/a.rs", "other": 1});
        assert_eq!(file_paths_from_input(&input), vec!["/a.rs"]);
        let input = json!({"filePath": "/b.rs", "path": "/c.rs"});
        assert_eq!(file_paths_from_input(&input), vec!["/c.rs", "/b.rs"]);
    }

    #[test]
    fn duplicates_are_collapsed() {
        let input = json!({"path": "/a.rs", "file": "/a.rs"});
        assert_eq!(file_paths_from_input(&input), vec!["/a.rs"]);
    }

    #[test]
    fn non_object_input_yields_nothing() {
        assert!(file_paths_from_input(&json!("text")).is_empty());
        assert!(file_paths_from_input(&json!(null)).is_empty());
    }

    #[tokio::test]
    async fn snapshot_outside_a_repo_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let snap = vcs_snapshot(dir.path(), Duration::from_secs(5)).await;
        assert!(snap.is_none());
    }
}
