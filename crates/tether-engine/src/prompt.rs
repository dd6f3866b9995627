use std::fmt::Write;
use tether_types::ElementDescriptor;

const MAX_PREVIEW_CHARS: usize = 280;

/// System prompt naming the page and the elements the chat is attached to
pub fn build_system_prompt(preamble: &str, page_url: &str, descriptors: &[ElementDescriptor]) -> String {
    let mut prompt = preamble.trim().to_string();
    let _ = write!(prompt, "\n\nPage: {page_url}\n\nAttached elements:");
    for (index, descriptor) in descriptors.iter().enumerate() {
        let _ = write!(prompt, "\n{}. <{}", index + 1, descriptor.tag_name);
        if let Some(id) = descriptor.dom_id() {
            let _ = write!(prompt, " id=\"{id}\"");
        }
        if !descriptor.class_list.is_empty() {
            let _ = write!(prompt, " class=\"{}\"", descriptor.class_list.join(" "));
        }
        prompt.push('>');

        let preview = descriptor.text_preview.trim();
        if !preview.is_empty() {
            let clipped: String = preview.chars().take(MAX_PREVIEW_CHARS).collect();
            let _ = write!(prompt, " \"{clipped}\"");
        }
    }
    prompt
}
