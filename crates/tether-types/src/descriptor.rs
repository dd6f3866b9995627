use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Rect;

/// Serializable description of a page element.
///
/// A descriptor never holds a live element. It is re-resolved against the page
/// whenever the element is needed, so it survives re-renders that replace the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    /// Logical identifier stamped on the element when it was picked
    pub element_id: String,
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub class_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default)]
    pub text_preview: String,
    /// Last known bounding rectangle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
}

impl ElementDescriptor {
    pub fn new(element_id: impl Into<String>, tag_name: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            tag_name: tag_name.into(),
            id: None,
            class_list: Vec::new(),
            css_selector: None,
            xpath: None,
            text_preview: String::new(),
            rect: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.class_list = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.css_selector = Some(selector.into());
        self
    }

    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath = Some(xpath.into());
        self
    }

    pub fn with_text_preview(mut self, text: impl Into<String>) -> Self {
        self.text_preview = text.into();
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn dom_id(&self) -> Option<&str> {
        non_blank(&self.id)
    }

    pub fn selector(&self) -> Option<&str> {
        non_blank(&self.css_selector)
    }

    pub fn structural_path(&self) -> Option<&str> {
        non_blank(&self.xpath)
    }

    pub fn logical_id(&self) -> Option<&str> {
        let trimmed = self.element_id.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Stable identity of "the same logical anchor" across resolutions.
///
/// Derived from a descriptor in order of preference: DOM id, CSS selector,
/// XPath, then the rounded last-known rectangle plus the descriptor's index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorKey(String);

impl AnchorKey {
    pub fn derive(descriptor: &ElementDescriptor, index: usize) -> Self {
        if let Some(id) = descriptor.dom_id() {
            return Self(format!("id:{id}"));
        }
        if let Some(selector) = descriptor.selector() {
            return Self(format!("css:{selector}"));
        }
        if let Some(xpath) = descriptor.structural_path() {
            return Self(format!("xpath:{xpath}"));
        }
        match descriptor.rect {
            Some(rect) => Self(format!(
                "rect:{}:{}:{}:{}#{index}",
                rect.top.round() as i64,
                rect.left.round() as i64,
                rect.width.round() as i64,
                rect.height.round() as i64,
            )),
            None => Self(format!("index:{index}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnchorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnchorKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
