use serde_json::{json, Value};

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracedown::{export_trace, ExportOptions, ExportStatus};

fn temp_workspace(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "tracedown-flows-{name}-{}",
        uuid::Uuid::new_v4()
    ));
    std::fs::create_dir_all(&root).expect("create temp workspace");
    root
}

fn write_archive(
    path: &Path,
    trace_lines: &[Value],
    network_lines: &[Value],
    resources: &[(&str, &[u8])],
) {
    let file = std::fs::File::create(path).expect("create archive");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let ndjson = |lines: &[Value]| {
        lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    };
    zip.start_file("trace.trace", options).expect("trace entry");
    zip.write_all(ndjson(trace_lines).as_bytes()).expect("trace bytes");
    if !network_lines.is_empty() {
        zip.start_file("trace.network", options).expect("network entry");
        zip.write_all(ndjson(network_lines).as_bytes()).expect("network bytes");
    }
    for (sha1, bytes) in resources {
        zip.start_file(format!("resources/{sha1}"), options).expect("resource entry");
        zip.write_all(bytes).expect("resource bytes");
    }
    zip.finish().expect("finish archive");
}

fn export(ws: &Path, trace_lines: &[Value], network_lines: &[Value], resources: &[(&str, &[u8])]) -> (PathBuf, ExportStatus) {
    let archive = ws.join("trace.zip");
    write_archive(&archive, trace_lines, network_lines, resources);
    let out_dir = ws.join("export");
    let summary = export_trace(&archive, &ExportOptions { out_dir: out_dir.clone() }).expect("export");
    (out_dir, summary.status)
}

fn read(out_dir: &Path, name: &str) -> String {
    std::fs::read_to_string(out_dir.join(name))
        .unwrap_or_else(|err| panic!("read {name}: {err}"))
}

fn context_options() -> Value {
    json!({
        "type": "context-options",
        "browserName": "chromium",
        "platform": "linux",
        "sdkLanguage": "javascript",
        "wallTime": 1700000000000.0_f64,
        "monotonicTime": 0.0,
        "options": {"viewport": {"width": 1280, "height": 720}}
    })
}

#[test]
fn passing_trace_reports_status_viewport_and_counts() {
    let ws = temp_workspace("passing");
    let mut lines = vec![context_options()];
    for i in 1..=12 {
        lines.push(json!({
            "type": "before",
            "callId": format!("call@{i}"),
            "startTime": (i as f64) * 10.0,
            "class": "Test",
            "method": "step",
            "title": format!("Step {i}"),
            "stack": [{"file": "tests/example.spec.ts", "line": i}]
        }));
        lines.push(json!({
            "type": "after",
            "callId": format!("call@{i}"),
            "endTime": (i as f64) * 10.0 + 5.0
        }));
    }

    let (out, status) = export(&ws, &lines, &[], &[]);
    assert_eq!(status, ExportStatus::Passed);

    let index = read(&out, "index.md");
    assert!(index.contains("**Status:** PASSED"), "index:\n{index}");
    assert!(index.contains("**Viewport:** 1280x720"));
    assert!(index.contains("**Actions:** 12"));
    assert!(index.contains("tests/example.spec.ts:1"));

    let timeline = read(&out, "timeline.md");
    assert!(timeline.contains("Total actions: 12"));
    assert!(timeline.contains("## 1. Step 1"));
    assert!(timeline.contains("- [1. Step 1](#1-step-1)"));
}

#[test]
fn errored_trace_lists_the_error_with_ansi_stripped() {
    let ws = temp_workspace("errored");
    let message =
        "\u{1b}[31mProtocol error (Page.navigate): Cannot navigate to invalid URL\u{1b}[0m";
    let lines = vec![
        context_options(),
        json!({
            "type": "before",
            "callId": "call@1",
            "startTime": 1.0,
            "class": "Test",
            "method": "step",
            "title": "Navigate"
        }),
        json!({
            "type": "after",
            "callId": "call@1",
            "endTime": 9.0,
            "error": {"error": {"message": message, "stack": "Error: nav\n    at main.js:1"}}
        }),
    ];

    let (out, status) = export(&ws, &lines, &[], &[]);
    assert_eq!(status, ExportStatus::Failed);

    let errors = read(&out, "errors.md");
    assert!(errors.contains("Total errors: 1"));
    assert!(errors
        .contains("Protocol error (Page.navigate): Cannot navigate to invalid URL"));
    assert!(!errors.contains('\u{1b}'), "ANSI escapes must be stripped");

    let index = read(&out, "index.md");
    assert!(index.contains("**Status:** FAILED"));
}

#[test]
fn snapshot_carries_restoration_markers_and_script() {
    let ws = temp_workspace("restore");
    let lines = vec![
        context_options(),
        json!({
            "type": "before",
            "callId": "call@1",
            "startTime": 1.0,
            "class": "Test",
            "method": "step",
            "title": "Fill form",
            "beforeSnapshot": "before@call@1"
        }),
        json!({"type": "after", "callId": "call@1", "endTime": 2.0}),
        json!({
            "type": "frame-snapshot",
            "snapshot": {
                "callId": "call@1",
                "snapshotName": "before@call@1",
                "frameId": "frame@1",
                "frameUrl": "https://example.com/",
                "timestamp": 1.5,
                "viewport": {"width": 1280, "height": 720},
                "html": ["HTML", {},
                    ["BODY", {"__playwright_scroll_top_": "500"},
                        ["INPUT", {"type": "text", "__playwright_value_": "Hello World"}],
                        ["INPUT", {"type": "checkbox", "__playwright_checked_": "true"}],
                        ["BASE", {"href": "https://example.com/"}]
                    ]
                ]
            }
        }),
    ];

    let (out, _) = export(&ws, &lines, &[], &[]);
    let html = read(&out, "assets/snapshots/before@call@1.html");

    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains(r#"__playwright_scroll_top_="500""#));
    assert!(html.contains(r#"__playwright_value_="Hello World""#));
    assert!(html.contains(r#"__playwright_checked_="true""#));
    assert!(!html.to_lowercase().contains("<base"), "no <base> allowed:\n{html}");
    // The restoration script handles every marker it preserves.
    assert!(html.contains("element.value = element.getAttribute(valueAttribute)"));
    assert!(html.contains("element.scrollTop = +element.getAttribute(scrollTopAttribute)"));

    let timeline = read(&out, "timeline.md");
    assert!(timeline.contains("[before](./assets/snapshots/before@call@1.html)"));
}

#[test]
fn shadow_dom_and_custom_element_markers_reach_the_document() {
    let ws = temp_workspace("shadow");
    let lines = vec![
        context_options(),
        json!({
            "type": "before",
            "callId": "call@1",
            "startTime": 1.0,
            "class": "Test",
            "method": "step",
            "title": "Shadow",
            "beforeSnapshot": "before@call@1"
        }),
        json!({"type": "after", "callId": "call@1", "endTime": 2.0}),
        json!({
            "type": "frame-snapshot",
            "snapshot": {
                "callId": "call@1",
                "snapshotName": "before@call@1",
                "frameId": "frame@1",
                "frameUrl": "https://example.com/",
                "timestamp": 1.5,
                "html": ["HTML", {},
                    ["BODY", {"__playwright_custom_elements__": "my-custom-element"},
                        ["DIV", {"id": "shadowHost"},
                            ["TEMPLATE", {"__playwright_shadow_root_": ""},
                                ["SPAN", {}, "Content inside shadow DOM"]
                            ]
                        ]
                    ]
                ]
            }
        }),
    ];

    let (out, _) = export(&ws, &lines, &[], &[]);
    let html = read(&out, "assets/snapshots/before@call@1.html");

    assert!(html.contains(r#"<DIV id="shadowHost">"#));
    assert!(html.contains("__playwright_shadow_root_"));
    assert!(html.contains("Content inside shadow DOM"));
    assert!(html.contains(r#"__playwright_custom_elements__="my-custom-element""#));
    assert!(html.contains("attachShadow({ mode: \"open\" })"));
    assert!(html.contains("customElements.define(name, class extends HTMLElement {})"));
}

#[test]
fn filmstrip_orders_frames_globally_by_timestamp() {
    let ws = temp_workspace("filmstrip");
    let hashes = ["f1aa", "f2bb", "f3cc", "f4dd", "f5ee"];
    let lines = vec![
        context_options(),
        json!({"type": "screencast-frame", "pageId": "page@1", "sha1": "f3cc", "timestamp": 30.0}),
        json!({"type": "screencast-frame", "pageId": "page@1", "sha1": "f1aa", "timestamp": 10.0}),
        json!({"type": "screencast-frame", "pageId": "page@2", "sha1": "f5ee", "timestamp": 50.0}),
        json!({"type": "screencast-frame", "pageId": "page@2", "sha1": "f2bb", "timestamp": 20.0}),
        json!({"type": "screencast-frame", "pageId": "page@1", "sha1": "f4dd", "timestamp": 40.0}),
    ];
    let blobs: Vec<(&str, &[u8])> = hashes.iter().map(|h| (*h, b"png-bytes".as_slice())).collect();

    let (out, _) = export(&ws, &lines, &[], &blobs);
    let filmstrip = read(&out, "filmstrip.md");
    assert!(filmstrip.contains("Total screenshots: 5"));

    let positions: Vec<usize> = hashes
        .iter()
        .map(|h| {
            filmstrip
                .find(&format!("[view](./assets/resources/{h})"))
                .unwrap_or_else(|| panic!("missing frame link {h}"))
        })
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted, "frames must be in timestamp order");

    for h in hashes {
        let blob = out.join("assets").join("resources").join(h);
        let meta = std::fs::metadata(&blob).expect("extracted frame");
        assert!(meta.len() > 0);
    }
}

#[test]
fn attachments_are_extracted_under_friendly_names() {
    let ws = temp_workspace("attachments");
    let files: [(&str, &str, &[u8]); 3] = [
        ("test-log.txt", "text/plain", b"log content"),
        ("test-data.json", "application/json", br#"{"k":1}"#),
        ("page-screenshot.png", "image/png", b"\x89PNG fake"),
    ];
    let lines = vec![
        context_options(),
        json!({
            "type": "before",
            "callId": "call@1",
            "startTime": 1.0,
            "class": "Test",
            "method": "step",
            "title": "Attach"
        }),
        json!({
            "type": "after",
            "callId": "call@1",
            "endTime": 2.0,
            "attachments": [
                {"name": "test-log.txt", "contentType": "text/plain", "sha1": "att01"},
                {"name": "test-data.json", "contentType": "application/json", "sha1": "att02"},
                {"name": "page-screenshot.png", "contentType": "image/png", "sha1": "att03"}
            ]
        }),
    ];
    let blobs: Vec<(&str, &[u8])> = vec![
        ("att01", files[0].2),
        ("att02", files[1].2),
        ("att03", files[2].2),
    ];

    let (out, _) = export(&ws, &lines, &[], &blobs);
    for (name, _, bytes) in files {
        let path = out.join("assets").join("attachments").join(name);
        let written = std::fs::read(&path).unwrap_or_else(|err| panic!("read {name}: {err}"));
        assert_eq!(written, bytes, "attachment {name} must round-trip exactly");
    }

    let attachments = read(&out, "attachments.md");
    assert!(attachments.contains("Total attachments: 3"));
    assert!(attachments.contains("[download](./assets/attachments/test-log.txt)"));
    assert!(attachments.contains("[download](./assets/attachments/page-screenshot.png)"));
}

#[test]
fn override_refs_and_subtree_refs_resolve_across_snapshots() {
    let ws = temp_workspace("refs");
    let css_url = "https://example.com/app.css";
    let lines = vec![
        context_options(),
        json!({
            "type": "before",
            "callId": "call@1",
            "startTime": 1.0,
            "class": "Test",
            "method": "step",
            "title": "First",
            "beforeSnapshot": "before@call@1"
        }),
        json!({"type": "after", "callId": "call@1", "endTime": 2.0}),
        json!({
            "type": "before",
            "callId": "call@2",
            "startTime": 3.0,
            "class": "Test",
            "method": "step",
            "title": "Second",
            "beforeSnapshot": "before@call@2"
        }),
        json!({"type": "after", "callId": "call@2", "endTime": 4.0}),
        json!({
            "type": "frame-snapshot",
            "snapshot": {
                "callId": "call@1",
                "snapshotName": "before@call@1",
                "frameId": "frame@1",
                "frameUrl": "https://example.com/",
                "timestamp": 1.5,
                "html": ["HTML", {}, ["BODY", {}, ["DIV", {"id": "shared"}, "shared fragment"]]],
                "resourceOverrides": [{"url": css_url, "sha1": "cafe01"}]
            }
        }),
        json!({
            "type": "frame-snapshot",
            "snapshot": {
                "callId": "call@2",
                "snapshotName": "before@call@2",
                "frameId": "frame@1",
                "frameUrl": "https://example.com/",
                "timestamp": 3.5,
                // Post-order of the first snapshot: text(0), DIV(1), BODY(2), HTML(3).
                "html": ["HTML", {},
                    ["HEAD", {}, ["LINK", {"rel": "stylesheet", "href": css_url}]],
                    ["BODY", {}, [[1, 1]]]
                ],
                "resourceOverrides": [{"url": css_url, "ref": 1}]
            }
        }),
    ];
    let blobs: Vec<(&str, &[u8])> = vec![("cafe01", b"body{}".as_slice())];

    let (out, _) = export(&ws, &lines, &[], &blobs);
    let html = read(&out, "assets/snapshots/before@call@2.html");
    assert!(
        html.contains(r#"href="../resources/cafe01""#),
        "ref override must resolve to the earlier sha1:\n{html}"
    );
    assert!(
        html.contains(r#"<DIV id="shared">shared fragment</DIV>"#),
        "subtree ref must splice the earlier node:\n{html}"
    );
    assert!(out.join("assets/resources/cafe01").exists());
}

#[test]
fn network_table_reports_failed_requests() {
    let ws = temp_workspace("network");
    let network = vec![
        json!({
            "type": "resource-snapshot",
            "snapshot": {
                "request": {"method": "GET", "url": "https://example.com/app.js"},
                "response": {"status": 200, "content": {"size": 120, "mimeType": "text/javascript", "_sha1": "bead22"}}
            }
        }),
        json!({
            "type": "resource-snapshot",
            "snapshot": {
                "request": {"method": "POST", "url": "https://example.com/api"},
                "response": {
                    "status": 503,
                    "content": {"size": 16, "mimeType": "text/plain", "text": "upstream unavailable"},
                    "_failureText": "service unavailable"
                }
            }
        }),
    ];
    let blobs: Vec<(&str, &[u8])> = vec![("bead22", b"console.log(1)".as_slice())];

    let (out, _) = export(&ws, &[context_options()], &network, &blobs);
    let network_md = read(&out, "network.md");
    assert!(network_md.contains("Total requests: 2"));
    assert!(network_md.contains("[view](./assets/resources/bead22)"));
    assert!(network_md.contains("## Failed Requests"));
    assert!(network_md.contains("POST https://example.com/api (503)"));
    assert!(network_md.contains("service unavailable"));
    assert!(network_md.contains("upstream unavailable"));
}

#[test]
fn test_step_inherits_snapshots_from_its_api_child() {
    let ws = temp_workspace("steps");
    let lines = vec![
        context_options(),
        json!({
            "type": "before",
            "callId": "step@1",
            "startTime": 1.0,
            "class": "Test",
            "method": "step",
            "title": "Click button"
        }),
        json!({"type": "after", "callId": "step@1", "endTime": 10.0}),
        json!({
            "type": "before",
            "callId": "api@1",
            "startTime": 2.0,
            "class": "Frame",
            "method": "click",
            "parentId": "step@1",
            "stepId": "step@1",
            "beforeSnapshot": "before@api@1"
        }),
        json!({"type": "after", "callId": "api@1", "endTime": 9.0}),
        json!({
            "type": "frame-snapshot",
            "snapshot": {
                "callId": "api@1",
                "snapshotName": "before@api@1",
                "frameId": "frame@1",
                "frameUrl": "https://example.com/",
                "timestamp": 2.5,
                "html": ["HTML", {}, ["BODY", {}, "ready"]]
            }
        }),
    ];

    let (out, _) = export(&ws, &lines, &[], &[]);
    let timeline = read(&out, "timeline.md");
    // The Test step has no snapshot of its own; the link comes via stepId.
    assert!(timeline.contains("## 1. Click button"));
    assert!(timeline.contains("[before](./assets/snapshots/before@api@1.html)"));
    // API actions stay out of the timeline.
    assert!(!timeline.contains("Frame.click"));
}

#[test]
fn css_in_style_elements_is_rewritten_against_the_network_map() {
    let ws = temp_workspace("css");
    let lines = vec![
        context_options(),
        json!({
            "type": "frame-snapshot",
            "snapshot": {
                "callId": "call@1",
                "snapshotName": "before@call@1",
                "frameId": "frame@1",
                "frameUrl": "https://example.com/",
                "timestamp": 1.0,
                "html": ["HTML", {}, ["HEAD", {},
                    ["STYLE", {}, "body { background: url(\"/a/b.png\"); }"]
                ]]
            }
        }),
    ];
    let network = vec![json!({
        "type": "resource-snapshot",
        "snapshot": {
            "request": {"method": "GET", "url": "https://example.com/a/b.png"},
            "response": {"status": 200, "content": {"size": 4, "_sha1": "11bg"}}
        }
    })];
    let blobs: Vec<(&str, &[u8])> = vec![("11bg", b"data".as_slice())];

    let (out, _) = export(&ws, &lines, &network, &blobs);
    let html = read(&out, "assets/snapshots/before@call@1.html");
    assert!(
        html.contains("background: url('../resources/11bg')"),
        "css url must resolve via the frame url:\n{html}"
    );
    assert!(out.join("assets/resources/11bg").exists());
}

#[test]
fn missing_archive_is_a_fatal_error() {
    let ws = temp_workspace("missing");
    let archive = ws.join("missing.zip");
    let result = export_trace(
        &archive,
        &ExportOptions {
            out_dir: ws.join("export"),
        },
    );
    assert!(result.is_err());
}

#[test]
fn archive_with_no_entries_is_a_fatal_error() {
    let ws = temp_workspace("empty");
    let archive = ws.join("empty.zip");
    let file = std::fs::File::create(&archive).expect("create archive");
    let zip = zip::ZipWriter::new(file);
    zip.finish().expect("finish archive");

    let result = export_trace(
        &archive,
        &ExportOptions {
            out_dir: ws.join("export"),
        },
    );
    assert!(result.is_err(), "a zero-entry archive must not export");
}
