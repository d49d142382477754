//! Element registry
//!
//! Stores discovered on-screen elements in insertion order and answers
//! lookups by id, role, name, type, locator, and point containment.
//!
//! The recorder is the only writer; replay treats the registry as read-only.
//! Interior locking lets both share one `Arc<ElementRegistry>`.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{ElementError, Result};
use crate::locator::Locator;
use crate::types::{Bounds, ElementId, ElementSelector, SelectorValidation, UIElement};

#[derive(Debug, Default)]
struct RegistryInner {
    elements: HashMap<ElementId, UIElement>,
    /// Insertion order, oldest first
    order: Vec<ElementId>,
    /// Last validation result per element
    validations: HashMap<ElementId, SelectorValidation>,
}

impl RegistryInner {
    fn ordered(&self) -> impl DoubleEndedIterator<Item = &UIElement> + '_ {
        self.order.iter().filter_map(move |id| self.elements.get(id))
    }
}

/// Thread-safe store of captured elements
#[derive(Debug, Default)]
pub struct ElementRegistry {
    inner: RwLock<RegistryInner>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element
    ///
    /// Re-adding an existing id replaces it and makes it the most recently added.
    pub fn add(&self, element: UIElement) {
        let mut inner = self.inner.write();
        let id = element.id.clone();
        if inner.elements.insert(id.clone(), element).is_some() {
            inner.order.retain(|existing| existing != &id);
            log::debug!("Replaced element '{}'", id);
        }
        inner.order.push(id);
    }

    pub fn get(&self, id: &str) -> Option<UIElement> {
        self.inner.read().elements.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().elements.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All elements in insertion order
    pub fn all(&self) -> Vec<UIElement> {
        self.inner.read().ordered().cloned().collect()
    }

    /// Replace a stored element, keeping its position
    pub fn update(&self, element: UIElement) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.elements.get_mut(&element.id) {
            Some(existing) => {
                *existing = element;
                Ok(())
            }
            None => Err(ElementError::NotFound(element.id)),
        }
    }

    /// Mutate a stored element in place
    ///
    /// The element id cannot be changed this way; any change to it is reverted.
    pub fn update_with<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut UIElement),
    {
        let mut inner = self.inner.write();
        let element = inner
            .elements
            .get_mut(id)
            .ok_or_else(|| ElementError::NotFound(id.to_string()))?;
        f(element);
        element.id = id.to_string();
        Ok(())
    }

    /// Attach a new selector to an element and drop its stale validation
    pub fn update_selector(&self, id: &str, selector: ElementSelector) -> Result<()> {
        self.update_with(id, |el| el.selector = Some(selector))?;
        self.inner.write().validations.remove(id);
        Ok(())
    }

    /// Remove an element, returning whether it existed
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        inner.validations.remove(id);
        if inner.elements.remove(id).is_some() {
            inner.order.retain(|existing| existing != id);
            true
        } else {
            false
        }
    }

    pub fn find_by_role(&self, role: &str) -> Vec<UIElement> {
        self.filter(|e| e.role == role)
    }

    pub fn find_by_name(&self, name: &str) -> Vec<UIElement> {
        self.filter(|e| e.name == name)
    }

    pub fn find_by_type(&self, element_type: &str) -> Vec<UIElement> {
        self.filter(|e| e.element_type == element_type)
    }

    pub fn find_by_locator(&self, locator: &Locator) -> Vec<UIElement> {
        self.filter(|e| locator.matches(e))
    }

    /// Element under a screen point
    ///
    /// Elements are scanned newest first, so where bounds overlap the most
    /// recently added element wins.
    pub fn find_at_point(&self, x: f64, y: f64) -> Option<UIElement> {
        self.inner
            .read()
            .ordered()
            .rev()
            .find(|e| e.bounds.contains(x, y))
            .cloned()
    }

    /// Bounds of every registered element
    pub fn bounds(&self) -> HashMap<ElementId, Bounds> {
        self.inner
            .read()
            .elements
            .iter()
            .map(|(id, e)| (id.clone(), e.bounds))
            .collect()
    }

    /// Re-check whether a selector still locates the element
    ///
    /// Candidates are tried in chain order; the first locator that matches
    /// only the target element makes the selector valid. When every matching
    /// locator is ambiguous the selector is invalid, with its confidence
    /// divided by the match count. The selector itself is never regenerated.
    pub fn validate(&self, element_id: &str, selector: &ElementSelector) -> SelectorValidation {
        let validation = {
            let inner = self.inner.read();
            if inner.elements.contains_key(element_id) {
                Self::resolve(&inner, element_id, selector)
            } else {
                SelectorValidation::invalid()
            }
        };

        if validation.match_count > 1 {
            log::warn!(
                "Selector '{}' for element '{}' is ambiguous ({} matches)",
                selector.primary,
                element_id,
                validation.match_count
            );
        } else if !validation.is_valid {
            log::warn!(
                "Selector '{}' no longer locates element '{}'",
                selector.primary,
                element_id
            );
        }

        let mut inner = self.inner.write();
        if inner.elements.contains_key(element_id) {
            inner
                .validations
                .insert(element_id.to_string(), validation.clone());
        }
        validation
    }

    fn resolve(
        inner: &RegistryInner,
        element_id: &str,
        selector: &ElementSelector,
    ) -> SelectorValidation {
        let mut ambiguous: Option<SelectorValidation> = None;
        for candidate in selector.candidates() {
            let locator = match Locator::parse(candidate) {
                Ok(locator) => locator,
                Err(e) => {
                    log::warn!("Skipping unparseable locator '{}': {}", candidate, e);
                    continue;
                }
            };

            let matches: Vec<&UIElement> =
                inner.ordered().filter(|e| locator.matches(e)).collect();
            if !matches.iter().any(|e| e.id == element_id) {
                continue;
            }

            let match_count = matches.len();
            if match_count == 1 {
                return SelectorValidation {
                    is_valid: true,
                    confidence: selector.confidence.clamp(0.0, 1.0),
                    match_count,
                    last_validated: Utc::now(),
                };
            }
            ambiguous.get_or_insert_with(|| SelectorValidation {
                is_valid: false,
                confidence: (selector.confidence / match_count as f64).clamp(0.0, 1.0),
                match_count,
                last_validated: Utc::now(),
            });
        }
        ambiguous.unwrap_or_else(SelectorValidation::invalid)
    }

    /// Most recent validation result for an element
    pub fn selector_validation(&self, id: &str) -> Option<SelectorValidation> {
        self.inner.read().validations.get(id).cloned()
    }

    /// Delete every element whose id is not in `referenced`
    ///
    /// Returns the removed ids in insertion order.
    pub fn prune_unreferenced(&self, referenced: &HashSet<String>) -> Vec<ElementId> {
        let mut inner = self.inner.write();
        let removed: Vec<ElementId> = inner
            .order
            .iter()
            .filter(|id| !referenced.contains(*id))
            .cloned()
            .collect();
        for id in &removed {
            inner.elements.remove(id);
            inner.validations.remove(id);
        }
        inner.order.retain(|id| referenced.contains(id));
        if !removed.is_empty() {
            log::info!("Pruned {} unreferenced elements", removed.len());
        }
        removed
    }

    fn filter<P>(&self, predicate: P) -> Vec<UIElement>
    where
        P: Fn(&UIElement) -> bool,
    {
        self.inner
            .read()
            .ordered()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}
