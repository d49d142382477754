//! Replay Elements - UI element identification for workflow replay
//!
//! Converts elements captured by the recorder into resilient,
//! confidence-scored selectors and re-validates them at replay time.
//!
//! - [`ElementRegistry`]: insertion-ordered store with role/name/type/point lookups
//! - [`SelectorGenerator`]: element → primary locator + fallback chain + confidence
//! - [`Locator`]: parsed `prefix:value` locator strings and element matching
//!
//! # Example
//!
//! ```ignore
//! use replay_elements::{ElementRegistry, SelectorGenerator};
//!
//! let registry = ElementRegistry::new();
//! let selector = SelectorGenerator::generate(&captured);
//! registry.add(captured.with_selector(selector.clone()));
//!
//! let validation = registry.validate("submit", &selector);
//! assert!(validation.is_valid);
//! ```

pub mod error;
pub mod generator;
pub mod locator;
pub mod registry;
pub mod types;

pub use error::{ElementError, Result};
pub use generator::{is_placeholder_id, SelectorGenerator};
pub use locator::Locator;
pub use registry::ElementRegistry;
pub use types::{
    Bounds, ElementId, ElementProperties, ElementSelector, PathSegment, SelectorFeatures,
    SelectorStrategy, SelectorValidation, UIElement,
};
