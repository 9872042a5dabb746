//! Render-tree model.
//!
//! The editing surface consumes this tree for display and hands an edited one
//! back; the parser produces it and the serializer consumes it. Blocks and
//! inlines are closed sum types so every serializer rule stays exhaustive by
//! construction, and the whole tree derives serde so hosts can snapshot or
//! diff it independently of any live session.
//!
//! Placeholder nodes carry only their registry back-reference (id, kind,
//! fence family) and never the opaque source text; the source lives in the
//! [`crate::placeholder::PlaceholderRegistry`] for the session's lifetime.

use serde::{Deserialize, Serialize};

use crate::placeholder::PlaceholderRef;

/// A parsed document: a flat sequence of top-level blocks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderTree {
    pub blocks: Vec<Block>,
}

impl RenderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Block-level node kinds.
///
/// Block nodes never nest inside inline nodes. Code bodies and inline code
/// are stored entity-escaped (the editing surface works in that space); the
/// serializer decodes them on the way back to markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph { content: Vec<Inline> },
    List(ListBlock),
    Quote { blocks: Vec<Block> },
    Code { language: Option<String>, body: String },
    Table(TableBlock),
    Image(ImageBlock),
    Rule,
    /// Display formula, `$$…$$` on its own. The source is raw and unrendered;
    /// typesetting is the rendering surface's job.
    Formula { source: String },
    /// Stand-in for an opaque embedded block held by the registry.
    Placeholder(PlaceholderRef),
}

/// Inline-level node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inline {
    Text(String),
    Emphasis(Vec<Inline>),
    Strong(Vec<Inline>),
    Strike(Vec<Inline>),
    /// No native markup equivalent; round-trips as a passthrough `<u>` tag.
    Underline(Vec<Inline>),
    Code(String),
    Link { href: String, content: Vec<Inline> },
    Formula { source: String, display: bool },
}

/// One list, ordered or not, possibly nested through its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBlock {
    pub ordered: bool,
    /// First marker number of an ordered list; ignored for bullets.
    pub start: u64,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub content: Vec<Inline>,
    pub children: Vec<ListBlock>,
}

/// Header row plus body rows. Cells hold inline content only; the
/// header-separator emitted on serialization always matches the header's
/// column count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBlock {
    pub header: Vec<Vec<Inline>>,
    pub rows: Vec<Vec<Vec<Inline>>>,
}

/// An image, block-scale. Width/height/alignment only exist for images the
/// user resized or aligned interactively; plain images keep all three unset
/// and round-trip through the compact markup form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub src: String,
    pub alt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub align: Option<ImageAlign>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageAlign {
    Left,
    Center,
    Right,
}

impl ImageAlign {
    /// The style directive carried by the explicit image form.
    pub fn style_directive(self) -> &'static str {
        match self {
            Self::Left => "display: block; margin-left: 0; margin-right: auto;",
            Self::Center => "display: block; margin-left: auto; margin-right: auto;",
            Self::Right => "display: block; margin-left: auto; margin-right: 0;",
        }
    }
}

/// Flatten inline content to plain text, dropping formatting.
///
/// Used where markup cannot carry structure (table cells, image alt text).
pub fn plain_text(content: &[Inline]) -> String {
    let mut out = String::new();
    collect_plain(content, &mut out);
    out
}

fn collect_plain(content: &[Inline], out: &mut String) {
    for inline in content {
        match inline {
            Inline::Text(text) => out.push_str(text),
            Inline::Emphasis(inner)
            | Inline::Strong(inner)
            | Inline::Strike(inner)
            | Inline::Underline(inner)
            | Inline::Link { content: inner, .. } => collect_plain(inner, out),
            Inline::Code(code) => out.push_str(&html_escape::decode_html_entities(code)),
            Inline::Formula { source, display } => {
                let dollars = if *display { "$$" } else { "$" };
                out.push_str(dollars);
                out.push_str(source);
                out.push_str(dollars);
            }
        }
    }
}
