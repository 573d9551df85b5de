//! In-memory trace model. All entities are built during ingestion and
//! immutable afterwards.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextOptions {
    pub viewport: Option<Viewport>,
    pub device_scale_factor: Option<f64>,
    pub is_mobile: bool,
    pub user_agent: Option<String>,
    #[serde(rename = "baseURL", alias = "baseUrl")]
    pub base_url: Option<String>,
}

/// Top-level container filled by the ingestor.
#[derive(Debug, Default)]
pub struct TraceModel {
    pub browser_name: String,
    pub channel: Option<String>,
    pub platform: Option<String>,
    pub sdk_language: Option<String>,
    pub version: Option<String>,
    /// Wall-clock start in unix epoch milliseconds.
    pub wall_time: f64,
    /// Monotonic start/end in milliseconds.
    pub start_time: f64,
    pub end_time: f64,
    pub options: ContextOptions,
    /// Sorted by `start_time` after ingestion.
    pub actions: Vec<Action>,
    pub console: Vec<ConsoleEvent>,
    pub errors: Vec<GlobalError>,
    pub resources: Vec<NetworkResource>,
    pub pages: Vec<Page>,
    /// Snapshots grouped by frame, each group in ingestion order. The group
    /// order defines the `snapshotsAgo` addressing used by subtree refs.
    pub frames: Vec<FrameSnapshots>,
    /// URL → content hash, derived from the network log (last write wins).
    pub network_map: HashMap<String, String>,
}

impl TraceModel {
    pub fn duration_ms(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// Global error records plus per-action errors, in action order.
    pub fn error_count(&self) -> usize {
        self.errors.len() + self.actions.iter().filter(|a| a.error.is_some()).count()
    }

    pub fn test_actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.class == "Test")
    }

    pub fn all_attachments(&self) -> impl Iterator<Item = (&Action, &Attachment)> {
        self.actions
            .iter()
            .flat_map(|a| a.attachments.iter().map(move |att| (a, att)))
    }
}

/// One recorded browser-automation operation or user-level test step.
#[derive(Debug, Clone, Default)]
pub struct Action {
    pub call_id: String,
    /// `"Test"` marks user-visible steps; other classes are API-level.
    pub class: String,
    pub method: String,
    pub title: Option<String>,
    pub params: Value,
    pub start_time: f64,
    pub end_time: f64,
    pub log: Vec<LogEntry>,
    pub error: Option<ActionError>,
    pub result: Option<Value>,
    pub stack: Vec<StackFrame>,
    pub page_id: Option<String>,
    pub parent_id: Option<String>,
    /// Back-reference from an API action to the user-level step that caused it.
    pub step_id: Option<String>,
    pub group: Option<String>,
    pub before_snapshot: Option<String>,
    pub after_snapshot: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl Action {
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) if !t.is_empty() => t.clone(),
            _ => format!("{}.{}", self.class, self.method),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    pub fn has_params(&self) -> bool {
        match &self.params {
            Value::Null => false,
            Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActionError {
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    #[serde(default)]
    pub function: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConsoleEvent {
    pub time: f64,
    /// Message severity: `log`, `warning`, `error`, ...
    pub message_type: String,
    pub text: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GlobalError {
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NetworkResource {
    pub method: String,
    pub url: String,
    pub status: Option<i64>,
    pub content: Option<ResponseContent>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContent {
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "_sha1", alias = "sha1")]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: String,
    pub frames: Vec<ScreencastFrame>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastFrame {
    pub sha1: String,
    #[serde(default)]
    pub timestamp: f64,
}

/// All snapshots recorded for one frame, in ingestion order.
#[derive(Debug)]
pub struct FrameSnapshots {
    pub frame_id: String,
    pub snapshots: Vec<FrameSnapshot>,
}

/// A serialized DOM tree of one frame at one instant.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSnapshot {
    #[serde(default)]
    pub call_id: String,
    #[serde(default)]
    pub snapshot_name: String,
    #[serde(default)]
    pub page_id: Option<String>,
    #[serde(default)]
    pub frame_id: String,
    /// Base URL for resolving relative references inside the snapshot.
    #[serde(default)]
    pub frame_url: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub doctype: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default = "DomNode::empty", alias = "root")]
    pub html: DomNode,
    #[serde(default)]
    pub resource_overrides: Vec<ResourceOverride>,
}

/// Per-snapshot instruction to rewrite a URL to a content hash, either
/// directly (`sha1`) or by pointing `ref` snapshots back within the same
/// frame to the override recorded there for the same URL.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceOverride {
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default, rename = "ref")]
    pub ref_offset: Option<usize>,
}

/// Tagged union of the three DOM node shapes found in a snapshot:
/// a bare string (text), `[[snapshotsAgo, nodeIndex]]` (subtree reference
/// into the post-order node list of an earlier same-frame snapshot), or
/// `[name, {attrs}, ...children]` (element).
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Text(String),
    SubtreeRef {
        snapshots_ago: usize,
        node_index: usize,
    },
    Element {
        name: String,
        attributes: BTreeMap<String, String>,
        children: Vec<DomNode>,
    },
}

impl DomNode {
    pub fn empty() -> Self {
        DomNode::Text(String::new())
    }

    pub fn from_value(value: &Value) -> Option<DomNode> {
        match value {
            Value::String(s) => Some(DomNode::Text(s.clone())),
            Value::Array(items) => match items.first()? {
                Value::Array(pair) if pair.len() == 2 => Some(DomNode::SubtreeRef {
                    snapshots_ago: pair[0].as_u64()? as usize,
                    node_index: pair[1].as_u64()? as usize,
                }),
                Value::String(name) => {
                    let mut attributes = BTreeMap::new();
                    let children_start = match items.get(1) {
                        Some(Value::Object(map)) => {
                            for (key, val) in map {
                                let val = match val {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                attributes.insert(key.clone(), val);
                            }
                            2
                        }
                        _ => 1,
                    };
                    let children = items[children_start.min(items.len())..]
                        .iter()
                        .filter_map(DomNode::from_value)
                        .collect();
                    Some(DomNode::Element {
                        name: name.clone(),
                        attributes,
                        children,
                    })
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for DomNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        DomNode::from_value(&value).ok_or_else(|| de::Error::custom("malformed DOM node"))
    }
}
