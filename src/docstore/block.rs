//! Hierarchical block model for the external document store.
//!
//! A `Block` is one node of the document tree: a typed payload plus
//! ordered children. The model is closed over the kinds the pipeline
//! reads and writes; anything else arrives as `Unsupported` and is
//! preserved in position so normalization never drops content.

use serde::{Deserialize, Serialize};

/// One styled text segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichText {
    pub text: String,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub code: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            italic: false,
            code: false,
            strikethrough: false,
            color: None,
            href: None,
        }
    }

    pub fn colored(text: impl Into<String>, color: &str) -> Self {
        Self {
            color: Some(color.to_string()),
            ..Self::plain(text)
        }
    }
}

/// Typed block payload. Tagged `type` on the wire, matching the
/// document store's own block payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Heading1 { text: Vec<RichText> },
    Heading2 { text: Vec<RichText> },
    Heading3 { text: Vec<RichText> },
    Paragraph { text: Vec<RichText> },
    BulletedListItem { text: Vec<RichText> },
    NumberedListItem { text: Vec<RichText> },
    ToDo { text: Vec<RichText>, checked: bool },
    Quote { text: Vec<RichText> },
    Code { text: Vec<RichText>, language: String },
    Callout { text: Vec<RichText>, icon: Option<String> },
    Toggle { text: Vec<RichText> },
    Divider,
    Image { caption: Vec<RichText>, url: String },
    FileRef { url: String },
    Embed { url: String },
    ChildPage { title: String },
    ChildDatabase { title: String },
    Unsupported { kind: String },
}

impl BlockKind {
    /// Inline text of the payload, if it carries any.
    pub fn text(&self) -> Option<&[RichText]> {
        match self {
            BlockKind::Heading1 { text }
            | BlockKind::Heading2 { text }
            | BlockKind::Heading3 { text }
            | BlockKind::Paragraph { text }
            | BlockKind::BulletedListItem { text }
            | BlockKind::NumberedListItem { text }
            | BlockKind::ToDo { text, .. }
            | BlockKind::Quote { text }
            | BlockKind::Code { text, .. }
            | BlockKind::Callout { text, .. }
            | BlockKind::Toggle { text } => Some(text),
            _ => None,
        }
    }

    fn text_mut(&mut self) -> Option<&mut Vec<RichText>> {
        match self {
            BlockKind::Heading1 { text }
            | BlockKind::Heading2 { text }
            | BlockKind::Heading3 { text }
            | BlockKind::Paragraph { text }
            | BlockKind::BulletedListItem { text }
            | BlockKind::NumberedListItem { text }
            | BlockKind::ToDo { text, .. }
            | BlockKind::Quote { text }
            | BlockKind::Code { text, .. }
            | BlockKind::Callout { text, .. }
            | BlockKind::Toggle { text } => Some(text),
            _ => None,
        }
    }
}

/// One node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// External id; `None` for blocks not yet written back.
    #[serde(default)]
    pub id: Option<String>,
    pub kind: BlockKind,
    #[serde(default)]
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            id: None,
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: BlockKind, children: Vec<Block>) -> Self {
        Self {
            id: None,
            kind,
            children,
        }
    }
}

// The derived drop would recurse through `children`, so a deeply nested
// tree could not even be freed. Drain descendants into a flat worklist
// so each node drops with no children attached.
impl Drop for Block {
    fn drop(&mut self) {
        let mut worklist = std::mem::take(&mut self.children);
        while let Some(mut block) = worklist.pop() {
            worklist.append(&mut block.children);
        }
    }
}

// Constructors used by the renderer and by tests. Single-segment rich
// text; segment limits are applied in a later pass (`enforce_segment_limit`).

pub fn heading1(text: &str) -> Block {
    Block::new(BlockKind::Heading1 {
        text: vec![RichText::plain(text)],
    })
}

pub fn heading2(text: &str) -> Block {
    Block::new(BlockKind::Heading2 {
        text: vec![RichText::plain(text)],
    })
}

pub fn heading3(text: &str) -> Block {
    Block::new(BlockKind::Heading3 {
        text: vec![RichText::plain(text)],
    })
}

pub fn paragraph(text: &str) -> Block {
    Block::new(BlockKind::Paragraph {
        text: vec![RichText::plain(text)],
    })
}

pub fn paragraph_colored(text: &str, color: &str) -> Block {
    Block::new(BlockKind::Paragraph {
        text: vec![RichText::colored(text, color)],
    })
}

pub fn bullet(text: &str) -> Block {
    Block::new(BlockKind::BulletedListItem {
        text: vec![RichText::plain(text)],
    })
}

pub fn numbered(text: &str) -> Block {
    Block::new(BlockKind::NumberedListItem {
        text: vec![RichText::plain(text)],
    })
}

pub fn todo(text: &str, color: &str) -> Block {
    Block::new(BlockKind::ToDo {
        text: vec![RichText::colored(text, color)],
        checked: false,
    })
}

pub fn quote(text: &str) -> Block {
    Block::new(BlockKind::Quote {
        text: vec![RichText::plain(text)],
    })
}

pub fn code(text: &str, language: &str) -> Block {
    Block::new(BlockKind::Code {
        text: vec![RichText::plain(text)],
        language: language.to_string(),
    })
}

pub fn divider() -> Block {
    Block::new(BlockKind::Divider)
}

/// Split every rich-text segment longer than `limit` characters into
/// multiple segments carrying the same annotations. Char-boundary safe.
/// Iterative, so nesting depth is unbounded.
pub fn enforce_segment_limit(blocks: &mut [Block], limit: usize) {
    let mut stack: Vec<&mut Block> = blocks.iter_mut().collect();
    while let Some(block) = stack.pop() {
        let Block { kind, children, .. } = block;
        if let Some(segments) = kind.text_mut() {
            let mut split: Vec<RichText> = Vec::with_capacity(segments.len());
            for segment in segments.drain(..) {
                if segment.text.chars().count() <= limit {
                    split.push(segment);
                    continue;
                }
                let chars: Vec<char> = segment.text.chars().collect();
                for chunk in chars.chunks(limit) {
                    split.push(RichText {
                        text: chunk.iter().collect(),
                        ..segment.clone()
                    });
                }
            }
            *segments = split;
        }
        stack.extend(children.iter_mut());
    }
}
