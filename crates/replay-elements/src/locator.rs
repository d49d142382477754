//! Locator strings and element matching
//!
//! Locators use the `prefix:value` syntax common to desktop automation
//! tools, e.g. `role:button|name:Submit`, `id:okButton`, `text:Save`.

use std::fmt;
use std::str::FromStr;

use crate::error::{ElementError, Result};
use crate::types::{SelectorStrategy, UIElement};

/// A single parsed locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Accessibility role with optional exact name
    Role { role: String, name: Option<String> },
    /// Accessible name
    Name(String),
    /// Element id or backend automation id
    Id(String),
    /// Structural path from the root, e.g. `/window/pane[1]/button`
    Path(String),
    /// Class name reported by the backend
    ClassName(String),
    /// Template-image hash
    Image(String),
    /// Visible text (OCR)
    Text(String),
}

impl Locator {
    /// Parse a locator string
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ElementError::invalid_locator("empty locator"));
        }

        if let Some((role_part, name_part)) = s.split_once('|') {
            let role = strip_prefix_ci(role_part.trim(), "role:").unwrap_or(role_part.trim());
            let name = strip_prefix_ci(name_part.trim(), "name:").unwrap_or(name_part.trim());
            if role.is_empty() {
                return Err(ElementError::invalid_locator(format!("missing role in '{}'", s)));
            }
            return Ok(Locator::Role {
                role: role.to_string(),
                name: Some(name.to_string()).filter(|n| !n.is_empty()),
            });
        }

        let (prefix, value) = s
            .split_once(':')
            .ok_or_else(|| ElementError::invalid_locator(format!("missing prefix in '{}'", s)))?;
        if value.is_empty() {
            return Err(ElementError::invalid_locator(format!("missing value in '{}'", s)));
        }
        let value = value.to_string();

        match prefix.to_ascii_lowercase().as_str() {
            "role" => Ok(Locator::Role {
                role: value,
                name: None,
            }),
            "name" => Ok(Locator::Name(value)),
            "id" => Ok(Locator::Id(value)),
            "path" | "xpath" => Ok(Locator::Path(value)),
            "classname" => Ok(Locator::ClassName(value)),
            "image" => Ok(Locator::Image(value)),
            "text" | "ocr" => Ok(Locator::Text(value)),
            other => Err(ElementError::invalid_locator(format!(
                "unknown prefix '{}' in '{}'",
                other, s
            ))),
        }
    }

    /// Strategy family this locator belongs to
    pub fn strategy(&self) -> SelectorStrategy {
        match self {
            Locator::Role { .. } => SelectorStrategy::Role,
            Locator::Name(_) => SelectorStrategy::Name,
            Locator::Id(_) | Locator::ClassName(_) => SelectorStrategy::CssPath,
            Locator::Path(_) => SelectorStrategy::XPath,
            Locator::Image(_) => SelectorStrategy::Image,
            Locator::Text(_) => SelectorStrategy::Ocr,
        }
    }

    /// Check whether an element satisfies this locator
    ///
    /// Roles compare case-insensitively; names and ids compare exactly.
    pub fn matches(&self, element: &UIElement) -> bool {
        match self {
            Locator::Role { role, name } => {
                element.effective_role().eq_ignore_ascii_case(role)
                    && name.as_ref().map_or(true, |n| element.name == *n)
            }
            Locator::Name(name) => element.name == *name,
            Locator::Id(id) => {
                element.id == *id || element.properties.automation_id() == Some(id.as_str())
            }
            Locator::Path(path) => element.structural_path().as_deref() == Some(path.as_str()),
            Locator::ClassName(class) => element.properties.class_name() == Some(class.as_str()),
            Locator::Image(hash) => element.properties.image_hash() == Some(hash.as_str()),
            Locator::Text(text) => {
                element.properties.text() == Some(text.as_str()) || element.name == *text
            }
        }
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Some(&s[prefix.len()..]),
        _ => None,
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Role {
                role,
                name: Some(name),
            } => write!(f, "role:{}|name:{}", role, name),
            Locator::Role { role, name: None } => write!(f, "role:{}", role),
            Locator::Name(name) => write!(f, "name:{}", name),
            Locator::Id(id) => write!(f, "id:{}", id),
            Locator::Path(path) => write!(f, "path:{}", path),
            Locator::ClassName(class) => write!(f, "classname:{}", class),
            Locator::Image(hash) => write!(f, "image:{}", hash),
            Locator::Text(text) => write!(f, "text:{}", text),
        }
    }
}

impl FromStr for Locator {
    type Err = ElementError;

    fn from_str(s: &str) -> Result<Self> {
        Locator::parse(s)
    }
}
