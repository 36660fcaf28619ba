//! Inline tag syntax, `<type:name:body>`, and locating a tag in a prompt.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::TagType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag must start with `<` and end with `>`")]
    Unbracketed,
    #[error("tag contains a nested `<` or `>`")]
    Nested,
    #[error("unknown tag type `{0}`")]
    UnknownType(String),
    #[error("tag has no entity name")]
    MissingName,
    #[error("tag has no weight body")]
    MissingBody,
}

/// One parsed tag. `body` is everything after the entity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub tag_type: TagType,
    pub name: String,
    pub body: String,
}

impl Tag {
    pub fn new(tag_type: TagType, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tag_type,
            name: name.into(),
            body: body.into(),
        }
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or(TagError::Unbracketed)?;
        if inner.contains(['<', '>']) {
            return Err(TagError::Nested);
        }
        let (kind, rest) = inner.split_once(':').ok_or(TagError::MissingName)?;
        let tag_type = TagType::from_name(kind).ok_or_else(|| TagError::UnknownType(kind.to_string()))?;
        let (name, body) = rest.split_once(':').ok_or(TagError::MissingBody)?;
        if name.is_empty() {
            return Err(TagError::MissingName);
        }
        if body.is_empty() {
            return Err(TagError::MissingBody);
        }
        Ok(Tag::new(tag_type, name, body))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}:{}:{}>", self.tag_type, self.name, self.body)
    }
}

/// A tag found in a prompt, with its byte range `start..end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpan {
    pub start: usize,
    pub end: usize,
    pub tag: Tag,
}

/// Finds the tag enclosing `cursor` (a byte offset into `prompt`).
///
/// The tag runs from the last `<` before the cursor to the first `>` at or
/// after it, and must contain no other angle brackets.
///
/// # Example
///
/// ```
/// use weight_helper_core::{locate_tag, TagType};
///
/// let prompt = "a cat, <lora:foo:0.8>, sitting";
/// let span = locate_tag(prompt, 12).unwrap();
/// assert_eq!(span.tag.tag_type, TagType::Lora);
/// assert_eq!(span.tag.name, "foo");
/// assert_eq!(&prompt[span.start..span.end], "<lora:foo:0.8>");
/// ```
pub fn locate_tag(prompt: &str, cursor: usize) -> Option<TagSpan> {
    if cursor > prompt.len() || !prompt.is_char_boundary(cursor) {
        return None;
    }
    let start = prompt[..cursor].rfind('<')?;
    let end = cursor + prompt[cursor..].find('>')? + 1;
    let tag = prompt[start..end].parse().ok()?;
    Some(TagSpan { start, end, tag })
}
