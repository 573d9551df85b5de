//! Streaming NDJSON event ingestion into the trace model.
//!
//! Every `*.trace` and `*.network` archive entry is read line by line; each
//! nonempty line is one JSON event dispatched on its `type` field. Traces are
//! produced by live recorders and partial corruption is common, so malformed
//! lines and unknown event types are dropped without failing the export.

use serde::Deserialize;
use serde_json::Value;

use std::collections::HashMap;

use crate::{
    Action, ActionError, Attachment, ConsoleEvent, ContextOptions, FrameSnapshot, FrameSnapshots,
    GlobalError, LogEntry, NetworkResource, Page, ResponseContent, ScreencastFrame, SourceLocation,
    StackFrame, TraceArchive, TraceModel, TracedownResult,
};

pub fn ingest(archive: &mut TraceArchive) -> TracedownResult<TraceModel> {
    let mut builder = ModelBuilder::default();

    let names: Vec<String> = archive
        .entry_names()
        .into_iter()
        .filter(|n| n.ends_with(".trace") || n.ends_with(".network"))
        .collect();
    for name in names {
        let text = match archive.read_string(&name) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("skipping unreadable log entry {name}: {err}");
                continue;
            }
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(line) {
                Ok(event) => builder.dispatch(event),
                Err(err) => tracing::debug!("dropping malformed trace line: {err}"),
            }
        }
    }

    Ok(builder.finish())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    #[serde(rename = "context-options")]
    ContextOptions(RawContextOptions),
    #[serde(rename = "before")]
    Before(RawBefore),
    #[serde(rename = "after")]
    After(RawAfter),
    #[serde(rename = "log")]
    Log(RawLog),
    #[serde(rename = "console")]
    Console(RawConsole),
    #[serde(rename = "error")]
    Error(RawError),
    #[serde(rename = "resource-snapshot")]
    ResourceSnapshot { snapshot: RawHarEntry },
    #[serde(rename = "screencast-frame")]
    ScreencastFrame(RawScreencastFrame),
    #[serde(rename = "frame-snapshot")]
    FrameSnapshot { snapshot: FrameSnapshot },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawContextOptions {
    browser_name: String,
    channel: Option<String>,
    platform: Option<String>,
    sdk_language: Option<String>,
    version: Option<String>,
    wall_time: f64,
    monotonic_time: f64,
    options: ContextOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawBefore {
    call_id: String,
    start_time: f64,
    class: String,
    method: String,
    #[serde(alias = "apiName")]
    title: Option<String>,
    params: Value,
    stack: Vec<StackFrame>,
    page_id: Option<String>,
    parent_id: Option<String>,
    step_id: Option<String>,
    group: Option<String>,
    before_snapshot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAfter {
    call_id: String,
    end_time: f64,
    error: Value,
    result: Option<Value>,
    after_snapshot: Option<String>,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawLog {
    call_id: String,
    time: f64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConsole {
    time: f64,
    message_type: String,
    text: String,
    location: Option<SourceLocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawError {
    message: String,
    stack: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawHarEntry {
    request: RawHarRequest,
    response: RawHarResponse,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawHarRequest {
    method: String,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawHarResponse {
    status: Option<i64>,
    content: Option<ResponseContent>,
    #[serde(rename = "_failureText", alias = "failureText")]
    failure_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawScreencastFrame {
    page_id: String,
    sha1: String,
    timestamp: f64,
}

#[derive(Default)]
struct ModelBuilder {
    model: TraceModel,
    action_index: HashMap<String, usize>,
    page_index: HashMap<String, usize>,
    frame_index: HashMap<String, usize>,
}

impl ModelBuilder {
    fn dispatch(&mut self, event: RawEvent) {
        match event {
            RawEvent::ContextOptions(raw) => {
                let model = &mut self.model;
                model.browser_name = raw.browser_name;
                model.channel = raw.channel;
                model.platform = raw.platform;
                model.sdk_language = raw.sdk_language;
                model.version = raw.version;
                model.wall_time = raw.wall_time;
                model.start_time = raw.monotonic_time;
                model.options = raw.options;
            }

            RawEvent::Before(raw) => {
                let action = Action {
                    call_id: raw.call_id.clone(),
                    class: raw.class,
                    method: raw.method,
                    title: raw.title,
                    params: raw.params,
                    start_time: raw.start_time,
                    end_time: raw.start_time,
                    stack: raw.stack,
                    page_id: raw.page_id,
                    parent_id: raw.parent_id,
                    step_id: raw.step_id,
                    group: raw.group,
                    before_snapshot: raw.before_snapshot,
                    ..Action::default()
                };
                // A repeated callId overwrites the earlier record.
                match self.action_index.get(&raw.call_id).copied() {
                    Some(i) => self.model.actions[i] = action,
                    None => {
                        self.action_index
                            .insert(raw.call_id, self.model.actions.len());
                        self.model.actions.push(action);
                    }
                }
            }

            RawEvent::After(raw) => {
                let Some(&i) = self.action_index.get(&raw.call_id) else {
                    // No matching `before`; drop.
                    return;
                };
                let action = &mut self.model.actions[i];
                action.end_time = raw.end_time;
                action.error = parse_action_error(&raw.error);
                action.result = raw.result.filter(|r| !r.is_null());
                action.after_snapshot = raw.after_snapshot;
                action.attachments = raw.attachments;
            }

            RawEvent::Log(raw) => {
                if let Some(&i) = self.action_index.get(&raw.call_id) {
                    self.model.actions[i].log.push(LogEntry {
                        time: raw.time,
                        message: raw.message,
                    });
                }
            }

            RawEvent::Console(raw) => {
                self.model.console.push(ConsoleEvent {
                    time: raw.time,
                    message_type: raw.message_type,
                    text: raw.text,
                    location: raw.location,
                });
            }

            RawEvent::Error(raw) => {
                self.model.errors.push(GlobalError {
                    message: raw.message,
                    stack: raw.stack,
                });
            }

            RawEvent::ResourceSnapshot { snapshot } => {
                let content = snapshot.response.content;
                if let Some(sha1) = content.as_ref().and_then(|c| c.sha1.clone()) {
                    if !snapshot.request.url.is_empty() {
                        // Later records win on duplicate URLs.
                        self.model
                            .network_map
                            .insert(snapshot.request.url.clone(), sha1);
                    }
                }
                self.model.resources.push(NetworkResource {
                    method: snapshot.request.method,
                    url: snapshot.request.url,
                    status: snapshot.response.status,
                    content,
                    failure: snapshot.response.failure_text,
                });
            }

            RawEvent::ScreencastFrame(raw) => {
                let i = *self
                    .page_index
                    .entry(raw.page_id.clone())
                    .or_insert_with(|| {
                        self.model.pages.push(Page {
                            page_id: raw.page_id,
                            frames: Vec::new(),
                        });
                        self.model.pages.len() - 1
                    });
                self.model.pages[i].frames.push(ScreencastFrame {
                    sha1: raw.sha1,
                    timestamp: raw.timestamp,
                });
            }

            RawEvent::FrameSnapshot { snapshot } => {
                let i = *self
                    .frame_index
                    .entry(snapshot.frame_id.clone())
                    .or_insert_with(|| {
                        self.model.frames.push(FrameSnapshots {
                            frame_id: snapshot.frame_id.clone(),
                            snapshots: Vec::new(),
                        });
                        self.model.frames.len() - 1
                    });
                self.model.frames[i].snapshots.push(snapshot);
            }

            RawEvent::Unknown => {}
        }
    }

    fn finish(mut self) -> TraceModel {
        self.model
            .actions
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        self.model.end_time = self
            .model
            .actions
            .iter()
            .map(|a| a.end_time)
            .fold(self.model.start_time, f64::max);
        self.model
    }
}

/// `after` events carry errors either as `{message, stack}` directly or
/// wrapped as `{error: {message, stack}}`.
fn parse_action_error(value: &Value) -> Option<ActionError> {
    let obj = match value.get("error") {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    };
    let message = obj.get("message")?.as_str()?.to_string();
    let stack = obj
        .get("stack")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    Some(ActionError { message, stack })
}
