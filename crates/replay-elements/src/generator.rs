//! Selector generation
//!
//! Turns a captured [`UIElement`] into an [`ElementSelector`]: a chain of
//! locators ordered from most to least resilient to incidental UI changes,
//! plus a confidence score.
//!
//! Chain tiers:
//!
//! 1. Semantic: role + name, name, role
//! 2. Structural: stable identifier, ancestry path, class name
//! 3. Visual: template image, OCR text

use crate::locator::Locator;
use crate::types::{ElementSelector, SelectorFeatures, SelectorStrategy, UIElement};

/// Confidence before any stabilizing feature is counted
pub const BASELINE_CONFIDENCE: f64 = 0.5;
const ROLE_WEIGHT: f64 = 0.15;
const NAME_WEIGHT: f64 = 0.15;
const IDENTIFIER_WEIGHT: f64 = 0.1;
const PATH_WEIGHT: f64 = 0.1;

/// Prefix the recorder uses for ids it had to invent
pub const PLACEHOLDER_ID_PREFIX: &str = "generated_";

/// Stateless selector generator
pub struct SelectorGenerator;

impl SelectorGenerator {
    /// Generate a selector for a captured element
    pub fn generate(element: &UIElement) -> ElementSelector {
        let features = Self::extract_features(element);
        let mut chain: Vec<Locator> = Vec::new();

        match (&features.role, &features.name) {
            (Some(role), Some(name)) => {
                chain.push(Locator::Role {
                    role: role.clone(),
                    name: Some(name.clone()),
                });
                chain.push(Locator::Name(name.clone()));
            }
            (None, Some(name)) => chain.push(Locator::Name(name.clone())),
            (Some(role), None) => chain.push(Locator::Role {
                role: role.clone(),
                name: None,
            }),
            (None, None) => {}
        }

        if let Some(identifier) = &features.identifier {
            chain.push(Locator::Id(identifier.clone()));
        }
        if let Some(path) = &features.xpath {
            chain.push(Locator::Path(path.clone()));
        }
        if let Some(class) = &features.css_path {
            chain.push(Locator::ClassName(class.clone()));
        }

        if let Some(image) = &features.image {
            chain.push(Locator::Image(image.clone()));
        }
        if let Some(text) = &features.ocr {
            chain.push(Locator::Text(text.clone()));
        }

        // Last resort so the selector is never empty
        if chain.is_empty() && !element.id.is_empty() {
            chain.push(Locator::Id(element.id.clone()));
        }

        let strategy = chain
            .first()
            .map(Locator::strategy)
            .unwrap_or(SelectorStrategy::CssPath);
        let fallback: Vec<String> = chain.iter().map(Locator::to_string).collect();
        let primary = fallback.first().cloned().unwrap_or_default();
        let confidence = Self::confidence(&features);

        log::debug!(
            "Generated selector for element '{}': primary='{}', {} candidates, confidence={:.2}",
            element.id,
            primary,
            fallback.len(),
            confidence
        );

        ElementSelector {
            primary,
            fallback,
            strategy,
            confidence,
            features,
        }
    }

    /// Generate a selector for a descendant of `root`, deriving its ancestry from the tree
    pub fn generate_in_tree(root: &UIElement, target_id: &str) -> Option<ElementSelector> {
        let target = root.find(target_id)?;
        let ancestors = root.ancestry_of(target_id)?;
        let located = target.clone().with_ancestors(ancestors);
        Some(Self::generate(&located))
    }

    /// Collect the features present on an element
    pub fn extract_features(element: &UIElement) -> SelectorFeatures {
        SelectorFeatures {
            role: non_empty(&element.role),
            name: non_empty(&element.name),
            identifier: Self::stable_identifier(element),
            xpath: element.structural_path(),
            css_path: element.properties.class_name().map(str::to_string),
            image: element.properties.image_hash().map(str::to_string),
            ocr: element.properties.text().map(str::to_string),
        }
    }

    /// Score a feature set
    ///
    /// Every weight is non-negative, so adding a feature never lowers the score.
    pub fn confidence(features: &SelectorFeatures) -> f64 {
        let mut confidence = BASELINE_CONFIDENCE;
        if features.role.is_some() {
            confidence += ROLE_WEIGHT;
        }
        if features.name.is_some() {
            confidence += NAME_WEIGHT;
        }
        if features.identifier.is_some() {
            confidence += IDENTIFIER_WEIGHT;
        }
        if features.xpath.is_some() {
            confidence += PATH_WEIGHT;
        }
        confidence.clamp(0.0, 1.0)
    }

    fn stable_identifier(element: &UIElement) -> Option<String> {
        element
            .properties
            .automation_id()
            .map(str::to_string)
            .or_else(|| non_empty(&element.id))
            .filter(|id| !is_placeholder_id(id))
    }
}

/// Whether an id was invented by the recorder rather than reported by the app
pub fn is_placeholder_id(id: &str) -> bool {
    id.trim().is_empty() || id.starts_with(PLACEHOLDER_ID_PREFIX)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
