use tether_types::{ElementDescriptor, EngineConfig, Rect};

use crate::surface::PageSurface;

/// Which lookup found the element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    Id,
    Selector,
    LogicalId,
    StructuralPath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<E> {
    pub element: E,
    pub rect: Rect,
    pub via: ResolvedBy,
}

/// Turns a descriptor back into a live element.
///
/// Lookup order: DOM id, CSS selector, logical identifier attribute
/// (disambiguated by last-known rectangle), and finally the structural path
/// for descriptors that carry nothing else. A miss is a transient state; the
/// caller polls again on the next tick.
#[derive(Debug, Clone)]
pub struct DescriptorResolver {
    logical_id_attribute: String,
    tolerance_px: f64,
}

impl DescriptorResolver {
    pub fn new(logical_id_attribute: impl Into<String>, tolerance_px: f64) -> Self {
        Self {
            logical_id_attribute: logical_id_attribute.into(),
            tolerance_px,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.logical_id_attribute.clone(), config.resolve_tolerance_px)
    }

    pub fn resolve<P: PageSurface>(&self, page: &P, descriptor: &ElementDescriptor) -> Option<P::Element> {
        self.locate(page, descriptor).map(|(element, _)| element)
    }

    /// Resolve and read the element's current rectangle in one pass
    pub fn resolve_with_rect<P: PageSurface>(
        &self,
        page: &P,
        descriptor: &ElementDescriptor,
    ) -> Option<Resolved<P::Element>> {
        let (element, via) = self.locate(page, descriptor)?;
        let rect = page.bounding_rect(&element);
        Some(Resolved { element, rect, via })
    }

    fn locate<P: PageSurface>(&self, page: &P, descriptor: &ElementDescriptor) -> Option<(P::Element, ResolvedBy)> {
        if let Some(id) = descriptor.dom_id() {
            if let Some(element) = page.element_by_id(id) {
                return Some((element, ResolvedBy::Id));
            }
        }

        if let Some(selector) = descriptor.selector() {
            match page.query_selector(selector) {
                Ok(Some(element)) => return Some((element, ResolvedBy::Selector)),
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "RESOLVER: skipping unusable selector"),
            }
        }

        if let Some(logical_id) = descriptor.logical_id() {
            let candidates = page.elements_with_attribute(&self.logical_id_attribute, logical_id);
            if let Some(element) = self.pick_candidate(page, candidates, descriptor.rect.as_ref()) {
                return Some((element, ResolvedBy::LogicalId));
            }
        }

        let has_other_path =
            descriptor.dom_id().is_some() || descriptor.selector().is_some() || descriptor.logical_id().is_some();
        if !has_other_path {
            if let Some(xpath) = descriptor.structural_path() {
                if let Some(element) = page.element_by_xpath(xpath) {
                    return Some((element, ResolvedBy::StructuralPath));
                }
            }
        }

        tracing::debug!(element_id = %descriptor.element_id, "RESOLVER: descriptor did not resolve");
        None
    }

    /// Several elements can share a logical id after a list re-render;
    /// prefer the one still sitting where the descriptor last saw it
    fn pick_candidate<P: PageSurface>(
        &self,
        page: &P,
        candidates: Vec<P::Element>,
        last_rect: Option<&Rect>,
    ) -> Option<P::Element> {
        if candidates.len() > 1 {
            if let Some(last_rect) = last_rect {
                if let Some(near) = candidates
                    .iter()
                    .find(|c| page.bounding_rect(c).near(last_rect, self.tolerance_px))
                {
                    return Some(near.clone());
                }
            }
        }
        candidates.into_iter().next()
    }
}

impl Default for DescriptorResolver {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
