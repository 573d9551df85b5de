//! Markdown renderers for the export. Pure functions from the immutable
//! model (plus the asset map) to file contents; all links are relative to
//! the export root (`./assets/...`).

use regex::Regex;

use std::collections::{HashMap, HashSet};

use crate::assets::{sanitize_snapshot_name, AssetMap};
use crate::model::{Action, TraceModel};
use crate::tree::{ActionNode, ActionTree, StepSnapshots};

const MAX_INDEX_ERRORS: usize = 10;
const MAX_CELL_MESSAGE: usize = 200;
const MAX_CELL_LOCATION: usize = 80;
const MAX_RESPONSE_BODY: usize = 1000;

pub fn render_readme(model: &TraceModel) -> String {
    let mut out = String::new();
    out.push_str("# Trace Export\n\n");
    out.push_str(&format!(
        "Export of a recorded `{}` browser-automation trace.\n\n",
        if model.browser_name.is_empty() {
            "unknown"
        } else {
            model.browser_name.as_str()
        }
    ));
    out.push_str("## Contents\n\n");
    out.push_str("| File | Description |\n|------|-------------|\n");
    out.push_str("| [index.md](./index.md) | Run summary and top-level status |\n");
    out.push_str("| [metadata.md](./metadata.md) | Environment, context options, timing |\n");
    out.push_str("| [timeline.md](./timeline.md) | Test steps with parameters, logs, snapshots |\n");
    out.push_str("| [errors.md](./errors.md) | Every recorded error with stack traces |\n");
    out.push_str("| [console.md](./console.md) | Console messages |\n");
    out.push_str("| [network.md](./network.md) | Network requests and failures |\n");
    out.push_str("| [filmstrip.md](./filmstrip.md) | Screencast frames over time |\n");
    out.push_str("| [attachments.md](./attachments.md) | Files attached by the test |\n");
    out.push_str("| `assets/snapshots/` | Renderable DOM snapshots (HTML) |\n");
    out.push_str("| `assets/resources/` | Raw response bodies and screenshots, keyed by hash |\n");
    out.push_str("| `assets/attachments/` | Attachment files under their declared names |\n");
    out.push_str("\n## Viewing snapshots\n\n");
    out.push_str(
        "Snapshots reference sibling resources with relative URLs, so serve this\n\
         directory over HTTP and open a snapshot in any browser:\n\n",
    );
    out.push_str("```sh\npython3 -m http.server 8000\n# then open http://localhost:8000/assets/snapshots/<name>.html\n```\n");
    out
}

pub fn render_index(model: &TraceModel) -> String {
    let errors = collect_errors(model);
    let failed = !errors.is_empty();

    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", index_title(model)));
    if let Some(path) = test_path(model) {
        out.push_str(&format!("**Test Path:** {path}\n\n"));
    }
    out.push_str(&format!(
        "**Status:** {}\n\n",
        if failed { "FAILED" } else { "PASSED" }
    ));
    out.push_str(&format!(
        "**Duration:** {}\n\n",
        fmt_duration(model.duration_ms())
    ));
    if let Some(viewport) = &model.options.viewport {
        out.push_str(&format!(
            "**Viewport:** {}x{}\n\n",
            viewport.width, viewport.height
        ));
    }
    out.push_str(&format!("**Actions:** {}\n\n", model.actions.len()));
    out.push_str(&format!("**Errors:** {}\n\n", errors.len()));

    if failed {
        out.push_str("## Errors\n\n");
        for (source, message) in errors.iter().take(MAX_INDEX_ERRORS) {
            let message = truncate(&strip_ansi(message), MAX_CELL_MESSAGE);
            match source {
                Some(title) => out.push_str(&format!("- **{}**: {}\n", escape_cell(title), message)),
                None => out.push_str(&format!("- {message}\n")),
            }
        }
        if errors.len() > MAX_INDEX_ERRORS {
            out.push_str(&format!("- and {} more\n", errors.len() - MAX_INDEX_ERRORS));
        }
        out.push('\n');
        out.push_str("See [errors.md](./errors.md) for stack traces.\n");
    }
    out
}

pub fn render_metadata(model: &TraceModel) -> String {
    let mut out = String::new();
    out.push_str("# Metadata\n\n");

    out.push_str("## Environment\n\n| Key | Value |\n|-----|-------|\n");
    push_row(&mut out, "Browser", Some(model.browser_name.as_str()));
    push_row(&mut out, "Channel", model.channel.as_deref());
    push_row(&mut out, "Platform", model.platform.as_deref());
    push_row(&mut out, "SDK language", model.sdk_language.as_deref());
    push_row(&mut out, "Version", model.version.as_deref());

    out.push_str("\n## Context Options\n\n| Key | Value |\n|-----|-------|\n");
    let viewport = model
        .options
        .viewport
        .map(|v| format!("{}x{}", v.width, v.height));
    push_row(&mut out, "Viewport", viewport.as_deref());
    let scale = model.options.device_scale_factor.map(|s| s.to_string());
    push_row(&mut out, "Device scale factor", scale.as_deref());
    push_row(
        &mut out,
        "Mobile",
        Some(if model.options.is_mobile { "yes" } else { "no" }),
    );
    push_row(&mut out, "User agent", model.options.user_agent.as_deref());
    push_row(&mut out, "Base URL", model.options.base_url.as_deref());

    out.push_str("\n## Timing\n\n| Key | Value |\n|-----|-------|\n");
    let wall = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(model.wall_time as i64)
        .map(|t| t.to_rfc3339());
    push_row(&mut out, "Wall-clock start", wall.as_deref());
    push_row(
        &mut out,
        "Monotonic start",
        Some(format!("{}ms", model.start_time).as_str()),
    );
    push_row(
        &mut out,
        "Monotonic end",
        Some(format!("{}ms", model.end_time).as_str()),
    );
    push_row(
        &mut out,
        "Duration",
        Some(fmt_duration(model.duration_ms()).as_str()),
    );
    out
}

pub fn render_timeline(
    model: &TraceModel,
    tree: &ActionTree,
    steps: &HashMap<String, StepSnapshots>,
    rendered_snapshots: &HashSet<String>,
) -> String {
    let mut out = String::new();
    out.push_str("# Timeline\n\n");
    out.push_str(&format!("Total actions: {}\n\n", model.actions.len()));

    if tree.is_empty() {
        out.push_str("No test steps were recorded.\n");
        return out;
    }

    // Number actions in tree order; headings and TOC anchors share it.
    let mut headings = Vec::new();
    let mut counter = 0usize;
    collect_headings(model, &tree.roots, 0, &mut counter, &mut headings);

    out.push_str("## Table of Contents\n\n");
    let mut anchors = Anchors::default();
    for (depth, title, _) in &headings {
        let anchor = anchors.next(title);
        out.push_str(&format!("{}- [{}](#{})\n", "  ".repeat(*depth), title, anchor));
    }
    out.push('\n');

    for (depth, title, index) in &headings {
        let action = &model.actions[*index];
        let level = (2 + depth).min(6);
        out.push_str(&format!("{} {}\n\n", "#".repeat(level), title));
        render_timeline_action(&mut out, model, action, steps, rendered_snapshots);
    }
    out
}

fn collect_headings(
    model: &TraceModel,
    nodes: &[ActionNode],
    depth: usize,
    counter: &mut usize,
    out: &mut Vec<(usize, String, usize)>,
) {
    for node in nodes {
        *counter += 1;
        let title = format!("{}. {}", counter, model.actions[node.index].display_title());
        out.push((depth, title, node.index));
        collect_headings(model, &node.children, depth + 1, counter, out);
    }
}

fn render_timeline_action(
    out: &mut String,
    model: &TraceModel,
    action: &Action,
    steps: &HashMap<String, StepSnapshots>,
    rendered_snapshots: &HashSet<String>,
) {
    out.push_str(&format!(
        "**Start:** {}\n\n",
        fmt_offset(action.start_time, model.start_time)
    ));
    out.push_str(&format!(
        "**Duration:** {}\n\n",
        fmt_duration(action.duration_ms())
    ));

    if let Some(frame) = action.stack.first() {
        let line = frame.line.map(|l| format!(":{l}")).unwrap_or_default();
        out.push_str(&format!("**Source:** {}{}\n\n", frame.file, line));
    }

    let internal = action.group.as_deref() == Some("internal");
    if action.has_params() && !internal {
        if let Ok(json) = serde_json::to_string_pretty(&action.params) {
            out.push_str("**Parameters:**\n\n```json\n");
            out.push_str(&json);
            out.push_str("\n```\n\n");
        }
    }
    if let Some(result) = &action.result {
        if let Ok(json) = serde_json::to_string_pretty(result) {
            out.push_str("**Result:**\n\n```json\n");
            out.push_str(&json);
            out.push_str("\n```\n\n");
        }
    }

    let inherited = steps.get(&action.call_id);
    let before = action
        .before_snapshot
        .as_deref()
        .or(inherited.and_then(|s| s.before.as_deref()));
    let after = action
        .after_snapshot
        .as_deref()
        .or(inherited.and_then(|s| s.after.as_deref()));
    let mut snapshot_links = Vec::new();
    if let Some(link) = snapshot_link(before, rendered_snapshots) {
        snapshot_links.push(format!("[before]({link})"));
    }
    if let Some(link) = snapshot_link(after, rendered_snapshots) {
        snapshot_links.push(format!("[after]({link})"));
    }
    if !snapshot_links.is_empty() {
        out.push_str(&format!("**Snapshots:** {}\n\n", snapshot_links.join(" | ")));
    }

    if !action.attachments.is_empty() {
        let links: Vec<String> = action
            .attachments
            .iter()
            .map(|a| {
                format!(
                    "[{}](./assets/attachments/{})",
                    escape_cell(&a.name),
                    crate::assets::sanitize_filename(&a.name)
                )
            })
            .collect();
        out.push_str(&format!("**Attachments:** {}\n\n", links.join(" | ")));
    }

    if !action.log.is_empty() {
        out.push_str(&format!(
            "<details>\n<summary>Log ({})</summary>\n\n```\n",
            action.log.len()
        ));
        for entry in &action.log {
            out.push_str(&format!(
                "{} {}\n",
                fmt_offset(entry.time, model.start_time),
                strip_ansi(&entry.message)
            ));
        }
        out.push_str("```\n\n</details>\n\n");
    }

    if let Some(error) = &action.error {
        out.push_str(&format!("**Error:** {}\n\n", strip_ansi(&error.message)));
        if let Some(stack) = &error.stack {
            out.push_str("<details>\n<summary>Stack trace</summary>\n\n```\n");
            out.push_str(&strip_ansi(stack));
            out.push_str("\n```\n\n</details>\n\n");
        }
    }
}

fn snapshot_link(name: Option<&str>, rendered: &HashSet<String>) -> Option<String> {
    let name = name?;
    if !rendered.contains(name) {
        // The snapshot failed to render; the entry loses its link.
        return None;
    }
    Some(format!(
        "./assets/snapshots/{}.html",
        sanitize_snapshot_name(name)
    ))
}

pub fn render_errors(model: &TraceModel) -> String {
    let errors = collect_errors(model);
    let stacks: Vec<Option<String>> = model
        .errors
        .iter()
        .map(|e| e.stack.clone())
        .chain(
            model
                .actions
                .iter()
                .filter_map(|a| a.error.as_ref().map(|e| e.stack.clone())),
        )
        .collect();

    let mut out = String::new();
    out.push_str("# Errors\n\n");
    out.push_str(&format!("Total errors: {}\n\n", errors.len()));

    for (i, ((source, message), stack)) in errors.iter().zip(stacks.iter()).enumerate() {
        out.push_str(&format!("## Error {}\n\n", i + 1));
        if let Some(title) = source {
            out.push_str(&format!("**Action:** {}\n\n", escape_cell(title)));
        }
        out.push_str("**Message:**\n\n```\n");
        out.push_str(&strip_ansi(message));
        out.push_str("\n```\n\n");
        if let Some(stack) = stack {
            out.push_str("<details>\n<summary>Stack trace</summary>\n\n```\n");
            out.push_str(&strip_ansi(stack));
            out.push_str("\n```\n\n</details>\n\n");
        }
    }
    out
}

/// Global errors first, then per-action errors in action order; each with an
/// optional owning-action title.
fn collect_errors(model: &TraceModel) -> Vec<(Option<String>, String)> {
    let mut out: Vec<(Option<String>, String)> = model
        .errors
        .iter()
        .map(|e| (None, e.message.clone()))
        .collect();
    for action in &model.actions {
        if let Some(error) = &action.error {
            out.push((Some(action.display_title()), error.message.clone()));
        }
    }
    out
}

pub fn render_console(model: &TraceModel) -> String {
    let mut out = String::new();
    out.push_str("# Console\n\n");
    out.push_str(&format!("Total messages: {}\n\n", model.console.len()));
    if model.console.is_empty() {
        return out;
    }

    out.push_str("| Time | Type | Message | Location |\n|------|------|---------|----------|\n");
    for event in &model.console {
        let location = event
            .location
            .as_ref()
            .map(|l| {
                let mut s = l.url.clone();
                if let Some(line) = l.line_number {
                    s.push_str(&format!(":{line}"));
                    if let Some(column) = l.column_number {
                        s.push_str(&format!(":{column}"));
                    }
                }
                s
            })
            .unwrap_or_default();
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            fmt_offset(event.time, model.start_time),
            escape_cell(&event.message_type),
            escape_cell(&truncate(&strip_ansi(&event.text), MAX_CELL_MESSAGE)),
            escape_cell(&truncate(&location, MAX_CELL_LOCATION)),
        ));
    }
    out
}

pub fn render_network(model: &TraceModel, assets: &AssetMap) -> String {
    let mut out = String::new();
    out.push_str("# Network\n\n");
    out.push_str(&format!("Total requests: {}\n\n", model.resources.len()));
    if model.resources.is_empty() {
        return out;
    }

    out.push_str(
        "| Method | URL | Status | Size | Content Type | Body |\n\
         |--------|-----|--------|------|--------------|------|\n",
    );
    for resource in &model.resources {
        let content = resource.content.as_ref();
        let size = content
            .and_then(|c| c.size)
            .map(|s| format!("{s}"))
            .unwrap_or_else(|| "-".to_string());
        let mime = content
            .and_then(|c| c.mime_type.clone())
            .unwrap_or_else(|| "-".to_string());
        let body = content
            .and_then(|c| c.sha1.as_deref())
            .and_then(|sha1| assets.path_for(sha1))
            .map(|path| format!("[view](./assets/{path})"))
            .unwrap_or_else(|| "-".to_string());
        let status = resource
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            escape_cell(&resource.method),
            escape_cell(&truncate(&resource.url, MAX_CELL_MESSAGE)),
            status,
            size,
            escape_cell(&mime),
            body,
        ));
    }

    let failed: Vec<_> = model
        .resources
        .iter()
        .filter(|r| r.status.is_some_and(|s| s >= 400))
        .collect();
    if !failed.is_empty() {
        out.push_str("\n## Failed Requests\n\n");
        for resource in failed {
            out.push_str(&format!(
                "### {} {} ({})\n\n",
                escape_cell(&resource.method),
                escape_cell(&truncate(&resource.url, MAX_CELL_MESSAGE)),
                resource.status.unwrap_or_default(),
            ));
            if let Some(failure) = &resource.failure {
                out.push_str(&format!("**Failure:** {}\n\n", strip_ansi(failure)));
            }
            if let Some(text) = resource.content.as_ref().and_then(|c| c.text.as_deref()) {
                out.push_str("<details>\n<summary>Response body</summary>\n\n```\n");
                out.push_str(&truncate(text, MAX_RESPONSE_BODY));
                out.push_str("\n```\n\n</details>\n\n");
            }
        }
    }
    out
}

pub fn render_filmstrip(model: &TraceModel) -> String {
    let mut frames: Vec<(&str, f64, &str)> = model
        .pages
        .iter()
        .flat_map(|p| {
            p.frames
                .iter()
                .map(move |f| (p.page_id.as_str(), f.timestamp, f.sha1.as_str()))
        })
        .collect();
    frames.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut out = String::new();
    out.push_str("# Filmstrip\n\n");
    out.push_str(&format!("Total screenshots: {}\n\n", frames.len()));
    if frames.is_empty() {
        return out;
    }

    out.push_str("| # | Time | Page | Screenshot |\n|---|------|------|------------|\n");
    for (i, (page, timestamp, sha1)) in frames.iter().enumerate() {
        out.push_str(&format!(
            "| {} | {} | {} | [view](./assets/resources/{}) |\n",
            i + 1,
            fmt_offset(*timestamp, model.start_time),
            escape_cell(page),
            sha1,
        ));
    }
    out
}

pub fn render_attachments(model: &TraceModel, assets: &AssetMap) -> String {
    let attachments: Vec<_> = model.all_attachments().collect();

    let mut out = String::new();
    out.push_str("# Attachments\n\n");
    out.push_str(&format!("Total attachments: {}\n\n", attachments.len()));
    if attachments.is_empty() {
        return out;
    }

    out.push_str(
        "| Name | Content Type | Action | Link |\n|------|--------------|--------|------|\n",
    );
    for (action, attachment) in attachments {
        let link = attachment
            .sha1
            .as_deref()
            .and_then(|sha1| assets.path_for(sha1))
            .map(|path| format!("[download](./assets/{path})"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            escape_cell(&attachment.name),
            escape_cell(&attachment.content_type),
            escape_cell(&action.display_title()),
            link,
        ));
    }
    out
}

fn index_title(model: &TraceModel) -> String {
    if let Some(action) = model.test_actions().next() {
        return action.display_title();
    }
    if model.browser_name.is_empty() {
        "Trace Export".to_string()
    } else {
        format!("{} trace", model.browser_name)
    }
}

fn test_path(model: &TraceModel) -> Option<String> {
    let frame = model.actions.iter().find_map(|a| a.stack.first())?;
    let line = frame.line.map(|l| format!(":{l}")).unwrap_or_default();
    Some(format!("{}{}", frame.file, line))
}

fn push_row(out: &mut String, key: &str, value: Option<&str>) {
    let value = match value {
        Some(v) if !v.is_empty() => escape_cell(v),
        _ => "-".to_string(),
    };
    out.push_str(&format!("| {key} | {value} |\n"));
}

/// GitHub heading slug: lowercase, drop anything that is not a word
/// character, whitespace, or hyphen, then turn each space into a hyphen
/// (runs are not collapsed).
pub fn github_anchor(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect()
}

/// Anchor generator with GitHub's duplicate suffixes (`-1`, `-2`, ...).
#[derive(Default)]
pub struct Anchors {
    seen: HashMap<String, usize>,
}

impl Anchors {
    pub fn next(&mut self, text: &str) -> String {
        let base = github_anchor(text);
        let count = self.seen.entry(base.clone()).or_insert(0);
        let anchor = if *count == 0 {
            base.clone()
        } else {
            format!("{base}-{count}")
        };
        *count += 1;
        anchor
    }
}

/// All user-visible messages strip ANSI color escapes.
pub fn strip_ansi(text: &str) -> String {
    ansi_regex().replace_all(text, "").into_owned()
}

fn ansi_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ansi regex"))
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}

fn fmt_offset(time: f64, start: f64) -> String {
    format!("+{:.3}s", (time - start).max(0.0) / 1000.0)
}

fn fmt_duration(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.0}ms", ms)
    }
}
