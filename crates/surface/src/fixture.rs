use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actor::{spawn_surface, SurfaceError, SurfaceHandle, SurfaceInjector};
use crate::page::{NodeHandle, PageDriver, PageError, RawNode};

/// Synthetic handles for form groups, kept clear of element handles.
const FORM_HANDLE_BASE: NodeHandle = 1_000_000;

fn default_width() -> f32 {
    100.0
}

fn default_height() -> f32 {
    20.0
}

/// One element of a fixture page. Behavior flags script the page quirks the
/// executor has to survive (frameworks swallowing value writes, editing
/// commands that no-op, links that unload the page, forms detached mid-submit).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct FixtureNode {
    pub tag: String,
    pub text: String,
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub has_click_handler: bool,
    pub editable: bool,
    pub value: Option<String>,
    pub href: Option<String>,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub name_attr: Option<String>,
    pub title_attr: Option<String>,
    pub image_alt: Option<String>,
    #[serde(default = "default_width")]
    pub width: f32,
    #[serde(default = "default_height")]
    pub height: f32,
    pub hidden_style: bool,
    pub ancestor_hidden: bool,
    /// Form group this element belongs to.
    pub form: Option<u64>,
    /// Submitting this element's form fails as detached.
    pub form_detached: bool,
    /// Raw base-descriptor value writes are clobbered by the page.
    pub raw_value_writes_ignored: bool,
    /// The editing-command insertion silently no-ops.
    pub command_insert_unsupported: bool,
    /// Clicking unloads the page and navigates here.
    pub click_navigates: Option<String>,
}

impl FixtureNode {
    fn base(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            width: default_width(),
            height: default_height(),
            ..Self::default()
        }
    }

    pub fn button(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::base("button")
        }
    }

    pub fn link(text: &str, href: &str) -> Self {
        Self {
            text: text.to_string(),
            href: Some(href.to_string()),
            ..Self::base("a")
        }
    }

    pub fn input(placeholder: &str, name: &str) -> Self {
        Self {
            input_type: Some("text".to_string()),
            placeholder: Some(placeholder.to_string()),
            name_attr: Some(name.to_string()),
            ..Self::base("input")
        }
    }

    pub fn heading(tag: &str, text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::base(tag)
        }
    }

    pub fn paragraph(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::base("p")
        }
    }

    pub fn span(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::base("span")
        }
    }
}

/// Serializable fixture page description, loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSpec {
    pub location: String,
    pub nodes: Vec<FixtureNode>,
}

#[derive(Debug, Default)]
struct PageState {
    location: String,
    nodes: Vec<FixtureNode>,
    marks: BTreeMap<NodeHandle, u32>,
    events: Vec<String>,
    gone: bool,
    scroll_y: i32,
}

/// Deterministic in-memory page driver for development and tests.
///
/// Clones share state, so a test can keep a handle while the surface actor
/// owns another and inspect the event log afterwards.
#[derive(Debug, Clone, Default)]
pub struct FixturePage {
    state: Arc<Mutex<PageState>>,
}

impl FixturePage {
    pub fn new(location: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                location: location.to_string(),
                ..PageState::default()
            })),
        }
    }

    pub fn from_spec(spec: &FixtureSpec) -> Self {
        let page = Self::new(&spec.location);
        page.state.lock().unwrap().nodes = spec.nodes.clone();
        page
    }

    pub fn from_file(path: &std::path::Path) -> omniagent_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let spec: FixtureSpec = serde_json::from_str(&content)?;
        Ok(Self::from_spec(&spec))
    }

    /// A small shop-like page for the CLI demo mode.
    pub fn demo() -> Self {
        let page = Self::new("https://shop.example/search?q=laptops");
        page.push(FixtureNode::heading("h1", "Results for laptops"));
        page.push({
            let mut n = FixtureNode::input("Search products", "q");
            n.form = Some(1);
            n
        });
        page.push(FixtureNode::button("Search"));
        page.push(FixtureNode::link(
            "Laptop Pro 14",
            "https://shop.example/p/laptop-pro-14",
        ));
        page.push(FixtureNode::span("R$ 7.499,00"));
        page.push(FixtureNode::link(
            "Laptop Air 13",
            "https://shop.example/p/laptop-air-13",
        ));
        page.push(FixtureNode::span("R$ 5.299,00"));
        page.push(FixtureNode::paragraph(
            "Free shipping on orders above R$ 500.",
        ));
        page
    }

    pub fn push(&self, node: FixtureNode) {
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn marks(&self) -> BTreeMap<NodeHandle, u32> {
        self.state.lock().unwrap().marks.clone()
    }

    pub fn current_location(&self) -> String {
        self.state.lock().unwrap().location.clone()
    }

    pub fn visible_value_of(&self, index: usize) -> Option<String> {
        let state = self.state.lock().unwrap();
        let node = state.nodes.get(index)?;
        node.value
            .clone()
            .or_else(|| node.editable.then(|| node.text.clone()))
    }

    /// Attach a fresh execution context to the (possibly navigated) page,
    /// the way a re-injected collaborator would.
    pub fn revive(&self) {
        self.state.lock().unwrap().gone = false;
    }

    fn log(&self, event: String) {
        self.state.lock().unwrap().events.push(event);
    }

    fn with_node<R>(&self, handle: NodeHandle, f: impl FnOnce(&mut FixtureNode) -> R) -> Option<R> {
        let mut state = self.state.lock().unwrap();
        let index = handle.checked_sub(1)? as usize;
        state.nodes.get_mut(index).map(f)
    }
}

impl PageDriver for FixturePage {
    fn location(&self) -> String {
        self.current_location()
    }

    fn nodes(&self) -> Vec<RawNode> {
        let state = self.state.lock().unwrap();
        if state.gone {
            return Vec::new();
        }
        state
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| RawNode {
                handle: i as NodeHandle + 1,
                tag: n.tag.clone(),
                input_type: n.input_type.clone(),
                role: n.role.clone(),
                has_click_handler: n.has_click_handler,
                editable: n.editable,
                text: n.text.clone(),
                value: n.value.clone(),
                href: n.href.clone(),
                placeholder: n.placeholder.clone(),
                aria_label: n.aria_label.clone(),
                name_attr: n.name_attr.clone(),
                title_attr: n.title_attr.clone(),
                image_alt: n.image_alt.clone(),
                width: n.width,
                height: n.height,
                hidden_style: n.hidden_style,
                ancestor_hidden: n.ancestor_hidden,
            })
            .collect()
    }

    fn mark(&mut self, handle: NodeHandle, id: u32) {
        self.state.lock().unwrap().marks.insert(handle, id);
    }

    fn clear_marks(&mut self) {
        self.state.lock().unwrap().marks.clear();
    }

    fn flash(&mut self, handle: NodeHandle) {
        self.log(format!("flash:{}", handle));
    }

    fn click(&mut self, handle: NodeHandle) -> Result<(), PageError> {
        if self.state.lock().unwrap().gone {
            return Err(PageError::Gone);
        }
        self.log(format!("click:{}", handle));
        let navigates = self.with_node(handle, |n| n.click_navigates.clone()).flatten();
        if let Some(url) = navigates {
            let mut state = self.state.lock().unwrap();
            state.location = url;
            state.gone = true;
            return Err(PageError::Gone);
        }
        Ok(())
    }

    fn focus(&mut self, handle: NodeHandle) {
        self.log(format!("focus:{}", handle));
    }

    fn dispatch_before_input(&mut self, handle: NodeHandle) {
        self.log(format!("beforeinput:{}", handle));
    }

    fn insert_text_command(&mut self, handle: NodeHandle, text: &str) -> bool {
        let inserted = self
            .with_node(handle, |n| {
                if n.command_insert_unsupported {
                    return false;
                }
                if n.editable {
                    n.text = text.to_string();
                } else {
                    n.value = Some(text.to_string());
                }
                true
            })
            .unwrap_or(false);
        if inserted {
            self.log(format!("insertText:{}:{}", handle, text));
        }
        inserted
    }

    fn is_editable_region(&self, handle: NodeHandle) -> bool {
        self.with_node(handle, |n| n.editable).unwrap_or(false)
    }

    fn set_text_content(&mut self, handle: NodeHandle, text: &str) {
        self.with_node(handle, |n| n.text = text.to_string());
        self.log(format!("setTextContent:{}", handle));
    }

    fn set_value_raw(&mut self, handle: NodeHandle, text: &str) {
        self.log(format!("setValueRaw:{}", handle));
        self.with_node(handle, |n| {
            if !n.raw_value_writes_ignored {
                n.value = Some(text.to_string());
            }
        });
    }

    fn visible_value(&self, handle: NodeHandle) -> Option<String> {
        self.with_node(handle, |n| {
            n.value
                .clone()
                .or_else(|| n.editable.then(|| n.text.clone()))
        })
        .flatten()
    }

    fn dispatch_input(&mut self, handle: NodeHandle, text: &str) {
        self.log(format!("input:{}:{}", handle, text));
    }

    fn dispatch_text_input_legacy(&mut self, handle: NodeHandle, _text: &str) {
        self.log(format!("textInput:{}", handle));
    }

    fn dispatch_change(&mut self, handle: NodeHandle) {
        self.log(format!("change:{}", handle));
    }

    fn press_commit_key(&mut self, handle: NodeHandle) {
        self.log(format!("enter:{}", handle));
    }

    fn form_of(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.with_node(handle, |n| n.form).flatten().map(|g| FORM_HANDLE_BASE + g)
    }

    fn submit_form(&mut self, form: NodeHandle) -> Result<(), PageError> {
        let group = form - FORM_HANDLE_BASE;
        let state = self.state.lock().unwrap();
        let detached = state
            .nodes
            .iter()
            .filter(|n| n.form == Some(group))
            .any(|n| n.form_detached);
        drop(state);
        if detached {
            return Err(PageError::Detached);
        }
        self.log(format!("submit:{}", group));
        Ok(())
    }

    fn scroll_by(&mut self, dy: i32) {
        self.state.lock().unwrap().scroll_y += dy;
        self.log(format!("scroll:{}", dy));
    }

    fn navigate(&mut self, url: &str) -> Result<(), PageError> {
        self.log(format!("navigate:{}", url));
        self.state.lock().unwrap().location = url.to_string();
        Ok(())
    }

    fn visible_text(&self) -> String {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .filter(|n| {
                n.width > 0.0 && n.height > 0.0 && !n.hidden_style && !n.ancestor_hidden
            })
            .map(|n| n.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Injects a surface collaborator for a fixture page. Each injection spawns a
/// fresh actor against the same shared page, the way re-injecting a script
/// into a live tab does.
pub struct FixtureInjector {
    page: FixturePage,
    settle: Duration,
    timeout: Duration,
}

impl FixtureInjector {
    pub fn new(page: FixturePage, settle: Duration, timeout: Duration) -> Self {
        Self {
            page,
            settle,
            timeout,
        }
    }

    pub fn page(&self) -> &FixturePage {
        &self.page
    }
}

#[async_trait]
impl SurfaceInjector for FixtureInjector {
    async fn inject(&self) -> Result<SurfaceHandle, SurfaceError> {
        self.page.revive();
        Ok(spawn_surface(
            Box::new(self.page.clone()),
            self.settle,
            self.timeout,
        ))
    }
}
