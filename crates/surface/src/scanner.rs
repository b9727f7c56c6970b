use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use omniagent_core::ElementId;
use regex::Regex;
use tracing::debug;

use crate::page::{NodeHandle, PageDriver, RawNode};

/// Non-interactive span/div text is only worth showing when it looks like a
/// price; list views carry exactly that kind of data.
static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$|R\$)\s*\d").expect("currency regex is valid"));

/// Bounds on heading/paragraph-like text: shorter is noise, longer wastes
/// prompt tokens.
const TEXT_MIN_CHARS: usize = 2;
const TEXT_MAX_CHARS: usize = 300;

const LABEL_MAX_CHARS: usize = 100;

/// Scan-scoped id → element mapping.
///
/// The registry is an arena owned by the scanner: it is rebuilt from scratch
/// on every scan and handed to the executor by reference per call. An id from
/// an earlier scan resolves to nothing.
#[derive(Debug, Default)]
pub struct ElementRegistry {
    entries: BTreeMap<ElementId, RegistryEntry>,
}

#[derive(Debug)]
struct RegistryEntry {
    handle: NodeHandle,
    line: String,
}

impl ElementRegistry {
    pub fn resolve(&self, id: ElementId) -> Option<NodeHandle> {
        self.entries.get(&id).map(|e| e.handle)
    }

    /// The description line emitted for an element during the scan.
    pub fn line(&self, id: ElementId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.line.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, id: ElementId, handle: NodeHandle, line: String) {
        self.entries.insert(id, RegistryEntry { handle, line });
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Perception scanner: produces the numbered textual description of the
/// page's interesting elements and the matching registry for this scan.
#[derive(Debug, Default)]
pub struct Scanner {
    registry: ElementRegistry,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    /// Replace any prior markers with a fresh set and rebuild the registry.
    /// Ids start at 1 and strictly increase in document order.
    pub fn scan(&mut self, driver: &mut dyn PageDriver) -> String {
        driver.clear_marks();
        self.registry.clear();

        let mut lines = Vec::new();
        let mut next_id: ElementId = 1;

        for node in driver.nodes() {
            if !selected(&node) {
                continue;
            }

            let id = next_id;
            next_id += 1;
            driver.mark(node.handle, id);

            let line = describe(id, &node);
            self.registry.insert(id, node.handle, line.clone());
            lines.push(line);
        }

        debug!(elements = self.registry.len(), "page scan complete");
        lines.join("\n")
    }

    /// Remove all markers and invalidate the registry. Idempotent.
    pub fn clear(&mut self, driver: &mut dyn PageDriver) {
        driver.clear_marks();
        self.registry.clear();
    }
}

fn is_visible(node: &RawNode) -> bool {
    node.width > 0.0 && node.height > 0.0 && !node.hidden_style && !node.ancestor_hidden
}

fn is_interactive(node: &RawNode) -> bool {
    match node.tag.as_str() {
        "a" => node.href.is_some(),
        "button" | "textarea" | "select" => true,
        "input" => node.input_type.as_deref() != Some("hidden"),
        _ => node.role.is_some() || node.has_click_handler,
    }
}

fn is_text_candidate(node: &RawNode) -> bool {
    matches!(node.tag.as_str(), "h1" | "h2" | "h3" | "h4" | "p" | "span" | "div")
}

/// Selection policy: interactive elements unconditionally; heading and
/// paragraph-like nodes only inside the text window; generic span/div text
/// additionally has to look like a price.
fn selected(node: &RawNode) -> bool {
    if !is_visible(node) {
        return false;
    }
    if is_interactive(node) {
        return true;
    }
    if !is_text_candidate(node) {
        return false;
    }

    let text = node.text.trim();
    let chars = text.chars().count();
    if chars < TEXT_MIN_CHARS || chars > TEXT_MAX_CHARS {
        return false;
    }
    if matches!(node.tag.as_str(), "span" | "div") && !CURRENCY_RE.is_match(text) {
        return false;
    }
    true
}

fn clean_text(s: &str) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(LABEL_MAX_CHARS).collect()
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(clean_text).filter(|c| !c.is_empty())
}

/// Label priority: visible text → accessible label → placeholder → name
/// attribute → field value → title attribute → embedded image alt →
/// editable-region fallback.
fn derive_label(node: &RawNode) -> String {
    if let Some(label) = non_empty(Some(node.text.as_str())) {
        return label;
    }
    if let Some(label) = non_empty(node.aria_label.as_deref()) {
        return label;
    }
    if let Some(label) = non_empty(node.placeholder.as_deref()) {
        return label;
    }
    if let Some(label) = non_empty(node.name_attr.as_deref()) {
        return label;
    }
    if let Some(label) = non_empty(node.value.as_deref()) {
        return label;
    }
    if let Some(label) = non_empty(node.title_attr.as_deref()) {
        return label;
    }
    if let Some(alt) = non_empty(node.image_alt.as_deref()) {
        return format!("Img: {}", alt);
    }
    if node.editable {
        return "Editable region".to_string();
    }
    "Unlabeled Element".to_string()
}

fn describe(id: ElementId, node: &RawNode) -> String {
    let mut extra = String::new();
    if node.tag == "a" {
        if let Some(href) = &node.href {
            extra = format!(" href=\"{}\"", href);
        }
    } else if node.tag == "input" {
        extra = format!(" value=\"{}\"", node.value.as_deref().unwrap_or(""));
    }
    format!("[ID: {}] <{}{}> \"{}\"", id, node.tag, extra, derive_label(node))
}
