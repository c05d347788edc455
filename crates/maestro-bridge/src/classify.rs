// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

/// Semantic category of a tool, derived from its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Read,
    Edit,
    Execute,
    Mcp,
    Other,
}

const READ_NAMES: &[&str] = &["read", "glob", "grep", "search", "find", "list", "ls"];
const READ_PREFIXES: &[&str] = &["read_", "search_", "list_", "view_"];
const READ_INFIXES: &[&str] = &["_read", "_search", "_glob", "_grep"];

const EDIT_NAMES: &[&str] = &[
    "write", "edit", "multiedit", "create", "delete", "move", "rename", "patch",
];
const EDIT_PREFIXES: &[&str] = &["write_", "edit_", "create_", "delete_"];
const EDIT_INFIXES: &[&str] = &[
    "str_replace", "_write", "_edit", "_create", "_delete", "_patch",
];

const EXEC_NAMES: &[&str] = &["bash", "run", "execute", "terminal", "shell", "cmd"];
const EXEC_PREFIXES: &[&str] = &["run_", "exec_", "bash_"];
const EXEC_INFIXES: &[&str] = &["_run", "_exec", "_bash", "_terminal", "_shell"];

/// Classify a tool name into its [`ToolKind`].
///
/// Total and deterministic: any string maps to exactly one kind. Matching is
/// case-insensitive; the MCP prefix wins over everything else.
pub fn classify_tool_kind(name: &str) -> ToolKind {
    let n = name.to_ascii_lowercase();
    if n.starts_with("mcp__") {
        return ToolKind::Mcp;
    }
    if matches_group(&n, READ_NAMES, READ_PREFIXES, READ_INFIXES) {
        return ToolKind::Read;
    }
    if matches_group(&n, EDIT_NAMES, EDIT_PREFIXES, EDIT_INFIXES) {
        return ToolKind::Edit;
    }
    if matches_group(&n, EXEC_NAMES, EXEC_PREFIXES, EXEC_INFIXES) {
        return ToolKind::Execute;
    }
    ToolKind::Other
}

fn matches_group(name: &str, exact: &[&str], prefixes: &[&str], infixes: &[&str]) -> bool {
    exact.contains(&name)
        || prefixes.iter().any(|p| name.starts_with(p))
        || infixes.iter().any(|i| name.contains(i))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
