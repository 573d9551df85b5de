//! Asset extraction: pulls every referenced content-hash blob out of the
//! archive into the export tree.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::snapshot::resolve_override_sha1;
use crate::{TraceArchive, TraceModel, TracedownResult};

/// Content hash → path relative to `assets/`. Attachments map to their
/// sanitized declared filename; everything else keys by hash.
#[derive(Debug, Default)]
pub struct AssetMap {
    paths: HashMap<String, String>,
}

impl AssetMap {
    pub fn path_for(&self, sha1: &str) -> Option<&str> {
        self.paths.get(sha1).map(String::as_str)
    }

    pub fn contains(&self, sha1: &str) -> bool {
        self.paths.contains_key(sha1)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// The transitive closure of content hashes the export needs up front:
/// snapshot overrides (following `ref` chains), screencast frames, network
/// bodies, and attachments. Hashes discovered later by the snapshot renderer
/// are topped up with [`extract_resource`].
pub fn collect_needed_sha1s(model: &TraceModel) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |sha1: String, seen: &mut HashSet<String>, out: &mut Vec<String>| {
        if seen.insert(sha1.clone()) {
            out.push(sha1);
        }
    };

    for frame in &model.frames {
        for (i, snap) in frame.snapshots.iter().enumerate() {
            for over in &snap.resource_overrides {
                if let Some(sha1) = resolve_override_sha1(&frame.snapshots, i, over) {
                    push(sha1, &mut seen, &mut out);
                }
            }
        }
    }
    for page in &model.pages {
        for frame in &page.frames {
            push(frame.sha1.clone(), &mut seen, &mut out);
        }
    }
    let mut urls: Vec<&String> = model.network_map.keys().collect();
    urls.sort();
    for url in urls {
        push(model.network_map[url].clone(), &mut seen, &mut out);
    }
    for (_, attachment) in model.all_attachments() {
        if let Some(sha1) = &attachment.sha1 {
            push(sha1.clone(), &mut seen, &mut out);
        }
    }
    out
}

pub fn extract_assets(
    archive: &mut TraceArchive,
    model: &TraceModel,
    out_dir: &Path,
) -> TracedownResult<AssetMap> {
    std::fs::create_dir_all(out_dir.join("assets").join("resources"))?;
    std::fs::create_dir_all(out_dir.join("assets").join("attachments"))?;

    let mut map = AssetMap::default();
    for sha1 in collect_needed_sha1s(model) {
        extract_resource(archive, &sha1, out_dir, &mut map);
    }

    // Attachments get a friendly name; their path wins over the hash path.
    for (_, attachment) in model.all_attachments() {
        let Some(sha1) = &attachment.sha1 else {
            continue;
        };
        let file_name = sanitize_filename(&attachment.name);
        match archive.read(&format!("resources/{sha1}")) {
            Ok(bytes) => {
                let dest = out_dir.join("assets").join("attachments").join(&file_name);
                if let Err(err) = std::fs::write(&dest, &bytes) {
                    tracing::warn!("failed to write attachment {}: {err}", dest.display());
                }
            }
            Err(err) => {
                tracing::warn!("missing attachment blob {sha1} ({}): {err}", attachment.name);
            }
        }
        map.paths
            .insert(sha1.clone(), format!("attachments/{file_name}"));
    }

    Ok(map)
}

/// Extract a single blob to `assets/resources/<sha1>`. Failures are logged
/// and swallowed: the referencing link still renders but may 404 when
/// viewed. The map records the path either way.
pub fn extract_resource(
    archive: &mut TraceArchive,
    sha1: &str,
    out_dir: &Path,
    map: &mut AssetMap,
) {
    if map.contains(sha1) {
        return;
    }
    let entry = format!("resources/{sha1}");
    match archive.read(&entry) {
        Ok(bytes) => {
            let dest = out_dir.join("assets").join("resources").join(sha1);
            if let Err(err) = std::fs::write(&dest, &bytes) {
                tracing::warn!("failed to write resource {}: {err}", dest.display());
            }
        }
        Err(err) => {
            tracing::warn!("missing resource blob {sha1}: {err}");
        }
    }
    map.paths.insert(sha1.to_string(), entry);
}

/// Attachment filenames come from the recorder; strip path separators and
/// reserved characters so a hostile name cannot escape the attachments dir.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Snapshot names become file stems under `assets/snapshots/`.
pub fn sanitize_snapshot_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '@' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}
