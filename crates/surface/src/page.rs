use std::fmt;

/// Opaque handle to a page element, valid for the lifetime of the page
/// context that produced it.
pub type NodeHandle = u64;

/// One element row in a page snapshot, in document order.
///
/// This is the raw material the scanner's selection policy and label
/// derivation work from; the driver reports state, the scanner decides.
#[derive(Debug, Clone, Default)]
pub struct RawNode {
    pub handle: NodeHandle,
    /// Lowercase tag name.
    pub tag: String,
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub has_click_handler: bool,
    /// Rich editable region (contenteditable-like), as opposed to a native field.
    pub editable: bool,
    /// Visible text content.
    pub text: String,
    /// Current field value for native inputs.
    pub value: Option<String>,
    /// Absolute link target for anchors.
    pub href: Option<String>,
    pub placeholder: Option<String>,
    pub aria_label: Option<String>,
    pub name_attr: Option<String>,
    pub title_attr: Option<String>,
    /// Alt text of an embedded image, if any.
    pub image_alt: Option<String>,
    pub width: f32,
    pub height: f32,
    /// The element's own resolved style hides it.
    pub hidden_style: bool,
    /// Some ancestor's resolved style hides it.
    pub ancestor_hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    /// The element or form is no longer attached to the document.
    Detached,
    /// The page context was torn down, typically by a navigation.
    Gone,
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::Detached => write!(f, "detached from document"),
            PageError::Gone => write!(f, "page context gone"),
        }
    }
}

/// Collaborator contract for the rendered page.
///
/// Rendering itself is out of scope; anything that can report a node
/// snapshot and perform these primitives can host the scanner and executor.
/// The text-injection primitives are deliberately fine-grained: the executor
/// owns the fallback policy, the driver only exposes the mechanisms.
pub trait PageDriver: Send {
    fn location(&self) -> String;

    /// Snapshot of all elements in document order.
    fn nodes(&self) -> Vec<RawNode>;

    /// Place a numbered visual marker on an element.
    fn mark(&mut self, handle: NodeHandle, id: u32);

    /// Remove all visual markers. Must be safe to call when none are active.
    fn clear_marks(&mut self);

    /// Briefly highlight an element for operator feedback.
    fn flash(&mut self, handle: NodeHandle);

    fn click(&mut self, handle: NodeHandle) -> Result<(), PageError>;

    fn focus(&mut self, handle: NodeHandle);

    /// Pre-input notification, dispatched before any insertion attempt.
    fn dispatch_before_input(&mut self, handle: NodeHandle);

    /// Editing-command insertion. Returns whether the content visibly
    /// changed; some pages silently ignore this mechanism.
    fn insert_text_command(&mut self, handle: NodeHandle, text: &str) -> bool;

    fn is_editable_region(&self, handle: NodeHandle) -> bool;

    /// Replace the text content of a rich editable region.
    fn set_text_content(&mut self, handle: NodeHandle, text: &str);

    /// Write a native field's value through its base descriptor, bypassing
    /// any framework-level value interceptor.
    fn set_value_raw(&mut self, handle: NodeHandle, text: &str);

    /// The value the user currently sees in the element.
    fn visible_value(&self, handle: NodeHandle) -> Option<String>;

    /// Input-changed notification carrying the inserted text as structured
    /// data.
    fn dispatch_input(&mut self, handle: NodeHandle, text: &str);

    /// Legacy text-input notification for older listener styles.
    fn dispatch_text_input_legacy(&mut self, handle: NodeHandle, text: &str);

    fn dispatch_change(&mut self, handle: NodeHandle);

    /// Full key-down/press/up sequence for the commit key (Enter).
    fn press_commit_key(&mut self, handle: NodeHandle);

    fn form_of(&self, handle: NodeHandle) -> Option<NodeHandle>;

    fn submit_form(&mut self, form: NodeHandle) -> Result<(), PageError>;

    fn scroll_by(&mut self, dy: i32);

    fn navigate(&mut self, url: &str) -> Result<(), PageError>;

    /// Full visible text content of the document.
    fn visible_text(&self) -> String;
}
