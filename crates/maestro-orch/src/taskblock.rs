// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use maestro_types::{ParsedTask, TaskSections};
use regex::Regex;
use std::sync::OnceLock;

/// Result of scanning a text for `@@@task` fenced blocks.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub tasks: Vec<ParsedTask>,
    /// The input with each valid block replaced by
    /// `<!-- task-placeholder-i -->` and each invalid one by
    /// `<!-- invalid-task-block-removed -->`, in original order.
    pub cleaned_text: String,
    pub block_count: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The fence token must stand alone on its line: no leading whitespace,
    // trailing whitespace allowed.
    RE.get_or_init(|| Regex::new(r"^@@@(?i:tasks?)?[ \t]*$").expect("static regex"))
}

fn h1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#[ \t]+(.+)$").expect("static regex"))
}

fn h2_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^##[ \t]+(.+)$").expect("static regex"))
}

/// Parse `@@@ … @@@` fenced task blocks out of free-form coordinator output.
///
/// A block is valid iff its body contains a first-level heading; the raw
/// heading text becomes the title (inline Markdown is NOT stripped). The
/// function is idempotent: running it over its own `cleaned_text` finds
/// nothing.
pub fn extract_task_blocks(text: &str) -> Extraction {
    let lines: Vec<&str> = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();

    let mut tasks = Vec::new();
    let mut cleaned: Vec<String> = Vec::new();
    let mut block_count = 0;
    let mut invalid_count = 0;

    let mut i = 0;
    while i < lines.len() {
        if !fence_re().is_match(lines[i]) {
            cleaned.push(lines[i].to_string());
            i += 1;
            continue;
        }

        // Opening fence: collect until the closing fence (or EOF, which
        // makes the block invalid by construction of a dangling fence).
        let body_start = i + 1;
        let mut j = body_start;
        while j < lines.len() && !fence_re().is_match(lines[j]) {
            j += 1;
        }
        let closed = j < lines.len();
        let body = &lines[body_start..j];
        block_count += 1;

        match parse_block(body) {
            Some(task) if closed => {
                cleaned.push(format!("<!-- task-placeholder-{} -->", tasks.len()));
                tasks.push(task);
            }
            _ => {
                invalid_count += 1;
                cleaned.push("<!-- invalid-task-block-removed -->".to_string());
            }
        }

        i = if closed { j + 1 } else { j };
    }

    let valid_count = tasks.len();
    Extraction {
        tasks,
        cleaned_text: cleaned.join("\n"),
        block_count,
        valid_count,
        invalid_count,
    }
}

fn parse_block(body: &[&str]) -> Option<ParsedTask> {
    let title_idx = body.iter().position(|l| h1_re().is_match(l))?;
    let title = h1_re()
        .captures(body[title_idx])
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end().to_string())?;

    let text = body.join("\n").trim().to_string();
    let sections = parse_sections(&body[title_idx + 1..]);

    Some(ParsedTask { title, text, sections })
}

fn parse_sections(body: &[&str]) -> TaskSections {
    let mut sections = TaskSections::default();
    let mut current: Option<(String, Vec<&str>)> = None;

    let mut flush = |sections: &mut TaskSections, current: &mut Option<(String, Vec<&str>)>| {
        if let Some((name, lines)) = current.take() {
            let content = lines.join("\n").trim().to_string();
            if content.is_empty() {
                return;
            }
            match name.as_str() {
                "objective" | "goal" => sections.objective = Some(content),
                "scope" => sections.scope = Some(content),
                "inputs" => sections.inputs = Some(content),
                "definition of done" => sections.definition_of_done = Some(content),
                "verification" => sections.verification = Some(content),
                "output required" => sections.output_required = Some(content),
                _ => {}
            }
        }
    };

    for line in body {
        if let Some(caps) = h2_re().captures(line) {
            flush(&mut sections, &mut current);
            let name = caps
                .get(1)
                .map(|m| m.as_str().trim().to_ascii_lowercase())
                .unwrap_or_default();
            current = Some((name, Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    flush(&mut sections, &mut current);
    sections
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
