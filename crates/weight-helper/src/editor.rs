//! The prompt text buffer a session edits.

use std::ops::Range;

/// A mutable prompt buffer addressed by byte offsets.
pub trait EditorBuffer {
    fn text(&self) -> &str;

    /// Replaces `range` with `replacement`.
    fn replace(&mut self, range: Range<usize>, replacement: &str);
}

/// In-memory buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBuffer {
    text: String,
}

impl TextBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl EditorBuffer for TextBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn replace(&mut self, range: Range<usize>, replacement: &str) {
        self.text.replace_range(range, replacement);
    }
}

impl EditorBuffer for String {
    fn text(&self) -> &str {
        self
    }

    fn replace(&mut self, range: Range<usize>, replacement: &str) {
        self.replace_range(range, replacement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_splices_range() {
        let mut buf = TextBuffer::new("a <lora:x:1> b");
        buf.replace(2..12, "<lora:x:0.5>");
        assert_eq!(buf.text(), "a <lora:x:0.5> b");
        assert_eq!(buf.into_string(), "a <lora:x:0.5> b");
    }
}
