//! DOM snapshot rendering: reconstructs one frame snapshot into a complete,
//! locally-renderable HTML document.
//!
//! Snapshots deduplicate aggressively: repeated DOM fragments are stored as
//! subtree references into earlier snapshots of the same frame, and HTTP
//! bodies are stored as per-snapshot URL overrides that may themselves point
//! backward. Rendering resolves both, rewrites every URL-bearing attribute to
//! `../resources/<sha1>`, and appends a fixed restoration script that
//! re-applies runtime-only state (form values, scroll offsets, shadow roots,
//! custom elements, adopted stylesheets) when the document loads.

use regex::Regex;
use url::Url;

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::model::{DomNode, FrameSnapshot, ResourceOverride};
use crate::{TracedownError, TracedownResult};

/// Reserved attribute namespace of the recording engine.
const ENGINE_PREFIX: &str = "__playwright_";

const FRAME_SRC_ATTRIBUTE: &str = "__playwright_src__";
const VALUE_ATTRIBUTE: &str = "__playwright_value_";
const CHECKED_ATTRIBUTE: &str = "__playwright_checked_";
const SELECTED_ATTRIBUTE: &str = "__playwright_selected_";
const POPOVER_OPEN_ATTRIBUTE: &str = "__playwright_popover_open_";
const DIALOG_OPEN_ATTRIBUTE: &str = "__playwright_dialog_open_";
const SHADOW_ROOT_ATTRIBUTE: &str = "__playwright_shadow_root_";
const CUSTOM_ELEMENTS_ATTRIBUTE: &str = "__playwright_custom_elements__";
const STYLE_SHEET_ATTRIBUTE: &str = "__playwright_style_sheet_";
const SCROLL_TOP_ATTRIBUTE: &str = "__playwright_scroll_top_";
const SCROLL_LEFT_ATTRIBUTE: &str = "__playwright_scroll_left_";

/// Engine attributes that survive serialization; they drive the restoration
/// script. Everything else in the namespace is dropped.
const PRESERVED_ATTRIBUTES: [&str; 11] = [
    FRAME_SRC_ATTRIBUTE,
    VALUE_ATTRIBUTE,
    CHECKED_ATTRIBUTE,
    SELECTED_ATTRIBUTE,
    POPOVER_OPEN_ATTRIBUTE,
    DIALOG_OPEN_ATTRIBUTE,
    SHADOW_ROOT_ATTRIBUTE,
    CUSTOM_ELEMENTS_ATTRIBUTE,
    STYLE_SHEET_ATTRIBUTE,
    SCROLL_TOP_ATTRIBUTE,
    SCROLL_LEFT_ATTRIBUTE,
];

/// Void elements: no closing tag, children never serialized.
const SELF_CLOSING: [&str; 17] = [
    "AREA", "BASE", "BR", "COL", "COMMAND", "EMBED", "HR", "IMG", "INPUT", "KEYGEN", "LINK",
    "MENUITEM", "META", "PARAM", "SOURCE", "TRACK", "WBR",
];

pub struct SnapshotRenderer<'a> {
    /// All snapshots of one frame, in ingestion order.
    snapshots: &'a [FrameSnapshot],
    index: usize,
    network_map: &'a HashMap<String, String>,
}

pub struct RenderedSnapshot {
    pub html: String,
    /// Content hashes every successful URL rewrite resolved to; the asset
    /// extractor fetches these after rendering.
    pub used_sha1s: HashSet<String>,
}

struct RenderContext<'a> {
    overrides: HashMap<String, String>,
    used_sha1s: HashSet<String>,
    /// Memoized post-order node lists per snapshot index, built lazily while
    /// resolving subtree references.
    post_order: HashMap<usize, Vec<&'a DomNode>>,
}

impl<'a> SnapshotRenderer<'a> {
    pub fn new(
        snapshots: &'a [FrameSnapshot],
        index: usize,
        network_map: &'a HashMap<String, String>,
    ) -> TracedownResult<Self> {
        if index >= snapshots.len() {
            return Err(TracedownError::Render(format!(
                "snapshot index {index} out of range ({} snapshots)",
                snapshots.len()
            )));
        }
        Ok(Self {
            snapshots,
            index,
            network_map,
        })
    }

    fn current(&self) -> &'a FrameSnapshot {
        &self.snapshots[self.index]
    }

    pub fn render(&self) -> RenderedSnapshot {
        let snapshot = self.current();
        let mut ctx = RenderContext {
            overrides: self.build_override_map(),
            used_sha1s: HashSet::new(),
            post_order: HashMap::new(),
        };

        let mut out = String::new();
        out.push_str("<!DOCTYPE ");
        out.push_str(snapshot.doctype.as_deref().unwrap_or("html"));
        out.push_str(">\n");

        out.push_str(&format!(
            "<!-- snapshot {:?} frame {:?} t={}ms",
            snapshot.snapshot_name, snapshot.frame_url, snapshot.timestamp
        ));
        if let Some(viewport) = &snapshot.viewport {
            out.push_str(&format!(" viewport={}x{}", viewport.width, viewport.height));
        }
        out.push_str(" -->\n");

        self.serialize_node(&mut ctx, &mut out, &snapshot.html, self.index, None);

        out.push_str("<script>\n");
        out.push_str(RESTORE_SCRIPT);
        out.push_str("</script>\n");

        RenderedSnapshot {
            html: out,
            used_sha1s: ctx.used_sha1s,
        }
    }

    /// URL → sha1 for the current snapshot. A `ref` override defers to the
    /// override recorded for the same URL `ref` snapshots earlier; chains are
    /// followed strictly backward so malformed input cannot loop.
    fn build_override_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for o in &self.current().resource_overrides {
            if let Some(sha1) = resolve_override_sha1(self.snapshots, self.index, o) {
                map.insert(o.url.clone(), sha1);
            }
        }
        map
    }

    fn serialize_node(
        &self,
        ctx: &mut RenderContext<'a>,
        out: &mut String,
        node: &'a DomNode,
        snapshot_index: usize,
        parent_name: Option<&str>,
    ) {
        match node {
            DomNode::Text(text) => {
                if parent_name.is_some_and(|p| p.eq_ignore_ascii_case("STYLE")) {
                    let rewritten = self.rewrite_css(ctx, text);
                    out.push_str(&escape_text(&rewritten));
                } else {
                    out.push_str(&escape_text(text));
                }
            }

            DomNode::SubtreeRef {
                snapshots_ago,
                node_index,
            } => {
                // References only ever point backward within the same frame.
                let Some(target) = snapshot_index.checked_sub(*snapshots_ago) else {
                    return;
                };
                let Some(resolved) = self.post_order_node(ctx, target, *node_index) else {
                    return;
                };
                self.serialize_node(ctx, out, resolved, target, parent_name);
            }

            DomNode::Element {
                name,
                attributes,
                children,
            } => {
                let upper = name.to_ascii_uppercase();
                if upper == "BASE" {
                    // A live <base> would poison relative URLs in the viewer.
                    return;
                }
                let tag = if upper == "NOSCRIPT" {
                    "X-NOSCRIPT"
                } else {
                    name.as_str()
                };

                out.push('<');
                out.push_str(tag);
                for (attr, value) in attributes {
                    if let Some((emit_name, emit_value)) =
                        self.render_attribute(ctx, &upper, attr, value)
                    {
                        out.push(' ');
                        out.push_str(&emit_name);
                        out.push_str("=\"");
                        out.push_str(&escape_attribute(&emit_value));
                        out.push('"');
                    }
                }
                out.push('>');

                if SELF_CLOSING.contains(&upper.as_str()) {
                    return;
                }
                for child in children {
                    self.serialize_node(ctx, out, child, snapshot_index, Some(upper.as_str()));
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    /// Decide whether and how one attribute is emitted.
    fn render_attribute(
        &self,
        ctx: &mut RenderContext<'a>,
        element: &str,
        attr: &str,
        value: &str,
    ) -> Option<(String, String)> {
        if attr.starts_with(ENGINE_PREFIX) {
            if attr == FRAME_SRC_ATTRIBUTE && (element == "IFRAME" || element == "FRAME") {
                return Some(("src".to_string(), self.rewrite_url(ctx, value)));
            }
            if PRESERVED_ATTRIBUTES.contains(&attr) {
                return Some((attr.to_string(), value.to_string()));
            }
            return None;
        }

        let rewritten = if attr == "href" && element == "LINK" {
            self.rewrite_url(ctx, value)
        } else if attr == "src" && element != "A" && element != "LINK" {
            self.rewrite_url(ctx, value)
        } else if attr == "srcset" {
            self.rewrite_srcset(ctx, value)
        } else if attr == "style" {
            self.rewrite_css(ctx, value)
        } else {
            value.to_string()
        };
        Some((attr.to_string(), rewritten))
    }

    /// Rewrite one URL against the merged override/network maps. Lookup
    /// order: override[url], override[resolved], network[url],
    /// network[resolved]. Misses pass through unchanged.
    fn rewrite_url(&self, ctx: &mut RenderContext<'a>, url: &str) -> String {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("data:")
            || lower.starts_with("blob:")
            || lower.starts_with("javascript:")
        {
            return url.to_string();
        }

        let resolved = Url::parse(&self.current().frame_url)
            .ok()
            .and_then(|base| base.join(url).ok())
            .map(String::from);
        let sha1 = ctx
            .overrides
            .get(url)
            .or_else(|| resolved.as_ref().and_then(|r| ctx.overrides.get(r)))
            .or_else(|| self.network_map.get(url))
            .or_else(|| resolved.as_ref().and_then(|r| self.network_map.get(r)))
            .cloned();

        match sha1 {
            Some(sha1) => {
                let path = format!("../resources/{sha1}");
                ctx.used_sha1s.insert(sha1);
                path
            }
            None => url.to_string(),
        }
    }

    /// `srcset` is comma-separated `<url> <descriptor?>` entries; only the
    /// URL portion is rewritten.
    fn rewrite_srcset(&self, ctx: &mut RenderContext<'a>, value: &str) -> String {
        let entries: Vec<String> = value
            .split(',')
            .map(|entry| {
                let entry = entry.trim();
                let mut parts = entry.splitn(2, char::is_whitespace);
                let url = parts.next().unwrap_or_default();
                if url.is_empty() {
                    return entry.to_string();
                }
                let rewritten = self.rewrite_url(ctx, url);
                match parts.next() {
                    Some(descriptor) => format!("{rewritten} {}", descriptor.trim()),
                    None => rewritten,
                }
            })
            .collect();
        entries.join(", ")
    }

    /// Rewrite `url(...)` occurrences in inline CSS. Output is always
    /// single-quoted. External stylesheets are served verbatim from the
    /// resources directory; only inline CSS needs this pass.
    fn rewrite_css(&self, ctx: &mut RenderContext<'a>, css: &str) -> String {
        css_url_regex()
            .replace_all(css, |caps: &regex::Captures<'_>| {
                let body = strip_matching_quotes(caps[1].trim());
                format!("url('{}')", self.rewrite_url(ctx, body))
            })
            .into_owned()
    }

    fn post_order_node(
        &self,
        ctx: &mut RenderContext<'a>,
        snapshot_index: usize,
        node_index: usize,
    ) -> Option<&'a DomNode> {
        if !ctx.post_order.contains_key(&snapshot_index) {
            let mut list = Vec::new();
            collect_post_order(&self.snapshots[snapshot_index].html, &mut list);
            ctx.post_order.insert(snapshot_index, list);
        }
        ctx.post_order
            .get(&snapshot_index)
            .and_then(|list| list.get(node_index))
            .copied()
    }
}

/// Resolve an override to its content hash, following `ref` chains backward
/// through earlier snapshots of the same frame. Also used by the asset
/// extractor to pre-compute the blob closure.
pub fn resolve_override_sha1(
    snapshots: &[FrameSnapshot],
    index: usize,
    over: &ResourceOverride,
) -> Option<String> {
    let mut current = over;
    let mut at = index;
    loop {
        if let Some(sha1) = &current.sha1 {
            return Some(sha1.clone());
        }
        let back = current.ref_offset?;
        // A non-positive step would make the walk cyclic; refuse.
        if back == 0 || back > at {
            return None;
        }
        at -= back;
        current = snapshots[at]
            .resource_overrides
            .iter()
            .find(|c| c.url == over.url)?;
    }
}

/// Post-order (children before self) node list; this is the addressing
/// scheme subtree references index into. Reference placeholders themselves
/// are not listed.
fn collect_post_order<'a>(node: &'a DomNode, out: &mut Vec<&'a DomNode>) {
    match node {
        DomNode::Text(_) => out.push(node),
        DomNode::SubtreeRef { .. } => {}
        DomNode::Element { children, .. } => {
            for child in children {
                collect_post_order(child, out);
            }
            out.push(node);
        }
    }
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"url\(\s*([^)]*?)\s*\)").expect("css url regex"))
}

fn strip_matching_quotes(body: &str) -> &str {
    let bytes = body.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return &body[1..body.len() - 1];
        }
    }
    body
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Fixed client-side restoration script, appended to every rendered
/// snapshot. Form values, open popovers/dialogs, shadow roots, custom
/// elements, and adopted stylesheets are restored synchronously during
/// document construction; scroll offsets need final layout and run after
/// `load`. Restoration is scoped per root so shadow trees restore their own
/// state.
const RESTORE_SCRIPT: &str = r#"(function() {
  const valueAttribute = "__playwright_value_";
  const checkedAttribute = "__playwright_checked_";
  const selectedAttribute = "__playwright_selected_";
  const popoverOpenAttribute = "__playwright_popover_open_";
  const dialogOpenAttribute = "__playwright_dialog_open_";
  const shadowRootAttribute = "__playwright_shadow_root_";
  const customElementsAttribute = "__playwright_custom_elements__";
  const styleSheetAttribute = "__playwright_style_sheet_";
  const scrollTopAttribute = "__playwright_scroll_top_";
  const scrollLeftAttribute = "__playwright_scroll_left_";

  const scrollTops = [];
  const scrollLefts = [];

  const restoreRoot = (root) => {
    for (const element of root.querySelectorAll("[" + valueAttribute + "]")) {
      if (element.type !== "file")
        element.value = element.getAttribute(valueAttribute);
      element.removeAttribute(valueAttribute);
    }
    for (const element of root.querySelectorAll("[" + checkedAttribute + "]")) {
      element.checked = element.getAttribute(checkedAttribute) === "true";
      element.removeAttribute(checkedAttribute);
    }
    for (const element of root.querySelectorAll("[" + selectedAttribute + "]")) {
      element.selected = element.getAttribute(selectedAttribute) === "true";
      element.removeAttribute(selectedAttribute);
    }
    for (const element of root.querySelectorAll("[" + popoverOpenAttribute + "]")) {
      try { element.showPopover(); } catch (e) {}
      element.removeAttribute(popoverOpenAttribute);
    }
    for (const element of root.querySelectorAll("[" + dialogOpenAttribute + "]")) {
      try {
        if (element.getAttribute(dialogOpenAttribute) === "modal")
          element.showModal();
        else
          element.show();
      } catch (e) {}
      element.removeAttribute(dialogOpenAttribute);
    }
    for (const element of root.querySelectorAll("[" + scrollTopAttribute + "]"))
      scrollTops.push(element);
    for (const element of root.querySelectorAll("[" + scrollLeftAttribute + "]"))
      scrollLefts.push(element);
    for (const template of root.querySelectorAll("template[" + shadowRootAttribute + "]")) {
      const shadow = template.parentElement.attachShadow({ mode: "open" });
      shadow.appendChild(template.content);
      template.remove();
      restoreRoot(shadow);
    }
    if (root === document && document.body && document.body.hasAttribute(customElementsAttribute)) {
      for (const name of document.body.getAttribute(customElementsAttribute).split(",")) {
        if (name && !customElements.get(name))
          customElements.define(name, class extends HTMLElement {});
      }
      document.body.removeAttribute(customElementsAttribute);
    }
    for (const template of root.querySelectorAll("template[" + styleSheetAttribute + "]")) {
      try {
        const sheet = new CSSStyleSheet();
        sheet.replaceSync(template.getAttribute(styleSheetAttribute));
        root.adoptedStyleSheets = [...root.adoptedStyleSheets, sheet];
      } catch (e) {}
      template.remove();
    }
  };

  restoreRoot(document);

  window.addEventListener("load", () => {
    for (const element of scrollTops) {
      element.scrollTop = +element.getAttribute(scrollTopAttribute);
      element.removeAttribute(scrollTopAttribute);
    }
    for (const element of scrollLefts) {
      element.scrollLeft = +element.getAttribute(scrollLeftAttribute);
      element.removeAttribute(scrollLeftAttribute);
    }
  });
})();
"#;
