//! Core types for captured UI elements and their selectors
//!
//! A [`UIElement`] is produced by the recorder/inspector when the user
//! interacts with something on screen. The [`ElementSelector`] attached to it
//! describes how to find the same element again at replay time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a captured element
pub type ElementId = String;

/// Screen-space bounding rectangle of an element
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check whether a point lies inside the rectangle (edges inclusive)
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    /// Center point of the rectangle
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Free-form element properties reported by the accessibility backend
///
/// Well-known keys have typed accessors; anything else is reachable via [`get`](Self::get).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementProperties(BTreeMap<String, Value>);

impl ElementProperties {
    pub const TEXT: &'static str = "text";
    pub const VALUE: &'static str = "value";
    pub const PLACEHOLDER: &'static str = "placeholder";
    pub const ENABLED: &'static str = "enabled";
    pub const VISIBLE: &'static str = "visible";
    pub const CLASS_NAME: &'static str = "className";
    pub const AUTOMATION_ID: &'static str = "automationId";
    pub const IMAGE_HASH: &'static str = "imageHash";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty string value for a key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn text(&self) -> Option<&str> {
        self.get_str(Self::TEXT)
    }

    pub fn value(&self) -> Option<&str> {
        self.get_str(Self::VALUE)
    }

    pub fn placeholder(&self) -> Option<&str> {
        self.get_str(Self::PLACEHOLDER)
    }

    pub fn enabled(&self) -> Option<bool> {
        self.0.get(Self::ENABLED).and_then(Value::as_bool)
    }

    pub fn visible(&self) -> Option<bool> {
        self.0.get(Self::VISIBLE).and_then(Value::as_bool)
    }

    pub fn class_name(&self) -> Option<&str> {
        self.get_str(Self::CLASS_NAME)
    }

    pub fn automation_id(&self) -> Option<&str> {
        self.get_str(Self::AUTOMATION_ID)
    }

    pub fn image_hash(&self) -> Option<&str> {
        self.get_str(Self::IMAGE_HASH)
    }
}

impl FromIterator<(String, Value)> for ElementProperties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One hop of a structural path from the root window down to an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSegment {
    /// Role (or structural type when the role is unknown)
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 1-based position among same-role siblings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl PathSegment {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: None,
            index: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Render as an XPath-like step, e.g. `button[@name='OK'][2]`
    pub fn render(&self) -> String {
        let mut out = self.role.clone();
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            out.push_str(&format!("[@name='{}']", name));
        }
        if let Some(index) = self.index {
            out.push_str(&format!("[{}]", index));
        }
        out
    }
}

/// A captured on-screen element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UIElement {
    pub id: ElementId,
    /// Structural type reported by the backend (e.g. "Button", "Edit")
    #[serde(rename = "type")]
    pub element_type: String,
    /// Accessibility role
    #[serde(default)]
    pub role: String,
    /// Accessible display name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bounds: Bounds,
    /// Selector chosen at capture time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<ElementSelector>,
    #[serde(default, skip_serializing_if = "ElementProperties::is_empty")]
    pub properties: ElementProperties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UIElement>,
    /// Path from the root down to (but excluding) this element
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<PathSegment>,
}

impl UIElement {
    pub fn new(
        id: impl Into<String>,
        element_type: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
        bounds: Bounds,
    ) -> Self {
        Self {
            id: id.into(),
            element_type: element_type.into(),
            role: role.into(),
            name: name.into(),
            bounds,
            selector: None,
            properties: ElementProperties::new(),
            children: Vec::new(),
            ancestors: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn with_child(mut self, child: UIElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_ancestors(mut self, ancestors: Vec<PathSegment>) -> Self {
        self.ancestors = ancestors;
        self
    }

    pub fn with_selector(mut self, selector: ElementSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Role if known, otherwise the structural type
    pub fn effective_role(&self) -> &str {
        if self.role.trim().is_empty() {
            &self.element_type
        } else {
            &self.role
        }
    }

    /// This element's own path step (no sibling index)
    pub fn segment(&self) -> PathSegment {
        let segment = PathSegment::new(self.effective_role());
        if self.name.trim().is_empty() {
            segment
        } else {
            segment.with_name(self.name.clone())
        }
    }

    /// Full structural path, or `None` when no ancestry was captured
    pub fn structural_path(&self) -> Option<String> {
        if self.ancestors.is_empty() {
            return None;
        }
        let mut path = String::new();
        for segment in self.ancestors.iter().chain(std::iter::once(&self.segment())) {
            path.push('/');
            path.push_str(&segment.render());
        }
        Some(path)
    }

    /// Depth-first search for a descendant (or self) by id
    pub fn find(&self, id: &str) -> Option<&UIElement> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Compute the ancestry of a descendant relative to this element
    ///
    /// Sibling indices are assigned among children that share a role.
    /// Returns `None` when the target is not in this subtree.
    pub fn ancestry_of(&self, target_id: &str) -> Option<Vec<PathSegment>> {
        let mut trail = Vec::new();
        if self.collect_ancestry(target_id, self.segment(), &mut trail) {
            Some(trail)
        } else {
            None
        }
    }

    fn collect_ancestry(
        &self,
        target_id: &str,
        own_segment: PathSegment,
        trail: &mut Vec<PathSegment>,
    ) -> bool {
        if self.id == target_id {
            return true;
        }
        trail.push(own_segment);
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for child in &self.children {
            let count = seen.entry(child.effective_role()).or_insert(0);
            *count += 1;
            let segment = child.segment().with_index(*count);
            if child.collect_ancestry(target_id, segment, trail) {
                return true;
            }
        }
        trail.pop();
        false
    }
}

/// Strategy that produced a selector's primary locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorStrategy {
    XPath,
    CssPath,
    Role,
    Name,
    Image,
    Ocr,
}

/// Raw features a selector was derived from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Stable (non-placeholder) identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr: Option<String>,
}

/// A resilient description of how to locate an element again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSelector {
    /// Preferred locator string
    pub primary: String,
    /// Full locator chain, most resilient first (starts with `primary`)
    pub fallback: Vec<String>,
    pub strategy: SelectorStrategy,
    /// Robustness estimate in `[0, 1]`
    pub confidence: f64,
    pub features: SelectorFeatures,
}

impl ElementSelector {
    /// Locators to try in order: primary first, then the rest of the chain
    pub fn candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.fallback.len() + 1);
        if !self.primary.is_empty() {
            out.push(&self.primary);
        }
        for locator in &self.fallback {
            if !locator.is_empty() && !out.contains(&locator.as_str()) {
                out.push(locator);
            }
        }
        out
    }
}

/// Best-effort freshness record for a selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorValidation {
    pub is_valid: bool,
    pub confidence: f64,
    pub match_count: usize,
    pub last_validated: DateTime<Utc>,
}

impl SelectorValidation {
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            match_count: 0,
            last_validated: Utc::now(),
        }
    }
}
