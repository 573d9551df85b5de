//! One-shot export pipeline: archive → model → report directory.

use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::assets::{extract_assets, extract_resource, sanitize_snapshot_name};
use crate::ingest::ingest;
use crate::markdown;
use crate::snapshot::SnapshotRenderer;
use crate::tree::{build_step_snapshot_map, ActionTree};
use crate::{TraceArchive, TracedownResult};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    #[serde(rename = "outDir")]
    pub out_dir: String,
    pub status: ExportStatus,
    pub actions: usize,
    pub errors: usize,
    pub snapshots: usize,
    pub resources: usize,
    pub attachments: usize,
    pub pages: usize,
}

impl ExportSummary {
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "status={:?} actions={} errors={}\n",
            self.status, self.actions, self.errors
        ));
        out.push_str(&format!(
            "snapshots={} resources={} attachments={} pages={}\n",
            self.snapshots, self.resources, self.attachments, self.pages
        ));
        out.push_str(&format!("out={}", self.out_dir));
        out
    }
}

/// Export one trace archive into `options.out_dir`. Per-item failures
/// (missing blobs, unwritable snapshots) are logged and skipped so a partly
/// corrupted trace still yields a useful export; failures writing the
/// Markdown reports propagate.
pub fn export_trace(archive_path: &Path, options: &ExportOptions) -> TracedownResult<ExportSummary> {
    let mut archive = TraceArchive::open(archive_path)?;
    let model = ingest(&mut archive)?;

    let out_dir = options.out_dir.as_path();
    std::fs::create_dir_all(out_dir.join("assets").join("snapshots"))?;

    let tree = ActionTree::build(&model.actions, Some("Test"));
    let steps = build_step_snapshot_map(&model.actions);
    let mut assets = extract_assets(&mut archive, &model, out_dir)?;

    let mut rendered_names = HashSet::new();
    let mut used_sha1s = HashSet::new();
    for frame in &model.frames {
        for i in 0..frame.snapshots.len() {
            let name = frame.snapshots[i].snapshot_name.clone();
            if name.is_empty() {
                tracing::warn!("skipping unnamed snapshot in frame {}", frame.frame_id);
                continue;
            }
            let renderer = match SnapshotRenderer::new(&frame.snapshots, i, &model.network_map) {
                Ok(renderer) => renderer,
                Err(err) => {
                    tracing::warn!("skipping snapshot {name}: {err}");
                    continue;
                }
            };
            let rendered = renderer.render();
            let file = out_dir
                .join("assets")
                .join("snapshots")
                .join(format!("{}.html", sanitize_snapshot_name(&name)));
            match std::fs::write(&file, &rendered.html) {
                Ok(()) => {
                    rendered_names.insert(name);
                    used_sha1s.extend(rendered.used_sha1s);
                }
                Err(err) => {
                    tracing::warn!("failed to write snapshot {}: {err}", file.display());
                }
            }
        }
    }

    // Blobs first seen during rendering (e.g. via CSS url() scanning).
    let mut discovered: Vec<String> = used_sha1s.into_iter().collect();
    discovered.sort();
    for sha1 in discovered {
        extract_resource(&mut archive, &sha1, out_dir, &mut assets);
    }

    write_report(out_dir, "README.md", markdown::render_readme(&model))?;
    write_report(out_dir, "index.md", markdown::render_index(&model))?;
    write_report(out_dir, "metadata.md", markdown::render_metadata(&model))?;
    write_report(
        out_dir,
        "timeline.md",
        markdown::render_timeline(&model, &tree, &steps, &rendered_names),
    )?;
    write_report(out_dir, "errors.md", markdown::render_errors(&model))?;
    write_report(out_dir, "console.md", markdown::render_console(&model))?;
    write_report(out_dir, "network.md", markdown::render_network(&model, &assets))?;
    write_report(out_dir, "filmstrip.md", markdown::render_filmstrip(&model))?;
    write_report(
        out_dir,
        "attachments.md",
        markdown::render_attachments(&model, &assets),
    )?;

    let errors = model.error_count();
    Ok(ExportSummary {
        out_dir: out_dir.display().to_string(),
        status: if errors > 0 {
            ExportStatus::Failed
        } else {
            ExportStatus::Passed
        },
        actions: model.actions.len(),
        errors,
        snapshots: rendered_names.len(),
        resources: assets.len(),
        attachments: model.all_attachments().count(),
        pages: model.pages.len(),
    })
}

fn write_report(out_dir: &Path, name: &str, content: String) -> TracedownResult<()> {
    std::fs::write(out_dir.join(name), content)?;
    Ok(())
}
