use std::fmt::Debug;
use tether_types::Rect;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Invalid selector '{selector}': {reason}")]
    Invalid { selector: String, reason: String },
}

/// Element capability surface of the host page.
///
/// The page is an external resource that may mutate between any two calls.
/// Element handles returned here are only valid until the next mutation and
/// must never be stored on long-lived state; re-resolve through a descriptor.
pub trait PageSurface {
    /// Opaque live element handle
    type Element: Clone + PartialEq + Debug;

    fn element_by_id(&self, id: &str) -> Option<Self::Element>;

    /// First element matching `selector`, or an error when the selector does not parse
    fn query_selector(&self, selector: &str) -> Result<Option<Self::Element>, SelectorError>;

    /// All elements whose `attribute` equals `value`, in document order
    fn elements_with_attribute(&self, attribute: &str, value: &str) -> Vec<Self::Element>;

    fn element_by_xpath(&self, xpath: &str) -> Option<Self::Element>;

    fn bounding_rect(&self, element: &Self::Element) -> Rect;

    /// Whether the element is still attached to the document
    fn is_connected(&self, element: &Self::Element) -> bool;
}
