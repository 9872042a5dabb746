//! Render-tree serialization.
//!
//! [`serialize`] is the inverse of [`crate::parsing::parse_markup`]: every
//! node kind the editing surface can produce maps back to markup, and a
//! parse of the output yields the same tree. Placeholder nodes are resolved
//! against the registry and reinjected in their recorded fence family; an id
//! the registry does not know reproduces its marker line verbatim instead of
//! dropping content.

use std::sync::OnceLock;

use regex::Regex;

use crate::placeholder::PlaceholderRegistry;
use crate::tree::{Block, ImageBlock, Inline, ListBlock, RenderTree, TableBlock};

/// Knobs for markup generation.
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Emit an explicit `<img>` tag for images carrying width, height or
    /// alignment. When off those attributes are dropped and every image
    /// takes the compact `![alt](src)` form.
    pub explicit_image_attrs: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            explicit_image_attrs: true,
        }
    }
}

/// Serialize a render tree back to markup, reinjecting placeholder sources
/// from `registry`.
pub fn serialize(
    tree: &RenderTree,
    registry: &PlaceholderRegistry,
    options: &SerializeOptions,
) -> String {
    let chunks: Vec<String> = tree
        .blocks
        .iter()
        .map(|block| block_markup(block, registry, options))
        .collect();
    collapse_blank_runs(&chunks.join("\n"))
}

/// One block's markup, always ending in exactly one newline. Chunks are
/// joined with a blank line by the caller.
fn block_markup(
    block: &Block,
    registry: &PlaceholderRegistry,
    options: &SerializeOptions,
) -> String {
    match block {
        Block::Heading { level, content } => {
            let hashes = "#".repeat((*level).clamp(1, 6) as usize);
            format!("{hashes} {}\n", inline_markup(content).trim())
        }
        Block::Paragraph { content } => format!("{}\n", inline_markup(content)),
        Block::List(list) => {
            let mut out = String::new();
            list_markup(list, "", &mut out);
            out
        }
        Block::Quote { blocks } => {
            let inner: Vec<String> = blocks
                .iter()
                .map(|block| block_markup(block, registry, options))
                .collect();
            let mut out = String::new();
            for line in inner.join("\n").lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out
        }
        Block::Code { language, body } => {
            let mut decoded = html_escape::decode_html_entities(body).into_owned();
            if !decoded.is_empty() && !decoded.ends_with('\n') {
                decoded.push('\n');
            }
            format!("```{}\n{decoded}```\n", language.as_deref().unwrap_or(""))
        }
        Block::Table(table) => table_markup(table),
        Block::Image(image) => image_markup(image, options),
        Block::Rule => "---\n".to_string(),
        Block::Formula { source } => format!("$${source}$$\n"),
        Block::Placeholder(reference) => match registry.get(reference.id) {
            Some(found) => format!("{}\n", found.to_fenced()),
            None => {
                log::warn!(
                    "placeholder {} missing from registry; emitting its marker unchanged",
                    reference.id
                );
                format!("{}\n", reference.marker_line())
            }
        },
    }
}

fn list_markup(list: &ListBlock, indent: &str, out: &mut String) {
    for (offset, item) in list.items.iter().enumerate() {
        let marker = if list.ordered {
            format!("{}. ", list.start + offset as u64)
        } else {
            "- ".to_string()
        };
        out.push_str(indent);
        out.push_str(&marker);
        out.push_str(&inline_markup(&item.content));
        out.push('\n');
        // children line up under the item text, past the marker
        let child_indent = format!("{indent}{}", " ".repeat(marker.len()));
        for child in &item.children {
            list_markup(child, &child_indent, out);
        }
    }
}

fn table_markup(table: &TableBlock) -> String {
    let columns = table.header.len().max(1);
    let mut out = String::new();
    out.push_str(&table_row(&table.header, columns));
    out.push('|');
    for _ in 0..columns {
        out.push_str(" --- |");
    }
    out.push('\n');
    // body rows are padded or truncated to the header's column count
    for row in &table.rows {
        out.push_str(&table_row(row, columns));
    }
    out
}

fn table_row(cells: &[Vec<Inline>], columns: usize) -> String {
    let mut out = String::from("|");
    for index in 0..columns {
        let cell: &[Inline] = cells.get(index).map(Vec::as_slice).unwrap_or(&[]);
        out.push(' ');
        // pipes inside a cell must stay escaped or they split the row
        out.push_str(&inline_markup(cell).replace('|', "\\|"));
        out.push_str(" |");
    }
    out.push('\n');
    out
}

fn image_markup(image: &ImageBlock, options: &SerializeOptions) -> String {
    let has_attrs = image.width.is_some() || image.height.is_some() || image.align.is_some();
    if has_attrs && options.explicit_image_attrs {
        let mut tag = format!(
            "<img src=\"{}\" alt=\"{}\"",
            html_escape::encode_double_quoted_attribute(&image.src),
            html_escape::encode_double_quoted_attribute(&image.alt),
        );
        if let Some(width) = image.width {
            tag.push_str(&format!(" width=\"{width}\""));
        }
        if let Some(height) = image.height {
            tag.push_str(&format!(" height=\"{height}\""));
        }
        if let Some(align) = image.align {
            tag.push_str(&format!(" style=\"{}\"", align.style_directive()));
        }
        tag.push_str(">\n");
        return tag;
    }
    if has_attrs {
        log::warn!(
            "dropping size/alignment attributes from image {} in compact form",
            image.src
        );
    }
    format!("![{}]({})\n", image.alt, image.src)
}

fn inline_markup(content: &[Inline]) -> String {
    let mut out = String::new();
    for inline in content {
        match inline {
            Inline::Text(text) => out.push_str(text),
            Inline::Emphasis(inner) => {
                out.push('*');
                out.push_str(&inline_markup(inner));
                out.push('*');
            }
            Inline::Strong(inner) => {
                out.push_str("**");
                out.push_str(&inline_markup(inner));
                out.push_str("**");
            }
            Inline::Strike(inner) => {
                out.push_str("~~");
                out.push_str(&inline_markup(inner));
                out.push_str("~~");
            }
            Inline::Underline(inner) => {
                out.push_str("<u>");
                out.push_str(&inline_markup(inner));
                out.push_str("</u>");
            }
            Inline::Code(code) => {
                let decoded = html_escape::decode_html_entities(code);
                out.push_str(&code_span(&decoded));
            }
            Inline::Link { href, content } => {
                out.push('[');
                out.push_str(&inline_markup(content));
                out.push_str("](");
                out.push_str(href);
                out.push(')');
            }
            Inline::Formula { source, display } => {
                if *display {
                    out.push_str(&format!("$${source}$$"));
                } else {
                    out.push_str(&format!("${source}$"));
                }
            }
        }
    }
    out
}

/// Wrap a decoded code span in enough backticks to contain it.
fn code_span(code: &str) -> String {
    let longest = code
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let delimiter = "`".repeat(longest + 1);
    let pad = code.starts_with('`')
        || code.ends_with('`')
        || (code.starts_with(' ') && code.ends_with(' ') && !code.trim().is_empty());
    if pad {
        format!("{delimiter} {code} {delimiter}")
    } else {
        format!("{delimiter}{code}{delimiter}")
    }
}

/// Collapse runs of three or more newlines down to a single blank line.
/// Runs only once over the finished document; collapsing mid-pass could
/// merge unrelated adjacent blocks.
fn collapse_blank_runs(markup: &str) -> String {
    static RUNS: OnceLock<Regex> = OnceLock::new();
    let runs = RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("Invalid blank run regex"));
    runs.replace_all(markup, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parsing::parse_markup;
    use crate::placeholder::{FenceStyle, PlaceholderId, PlaceholderKind, PlaceholderRef};
    use crate::tree::{ImageAlign, ImageBlock};

    fn round_trip(markup: &str) -> String {
        let (stripped, registry) = PlaceholderRegistry::extract(markup);
        let tree = parse_markup(&stripped);
        serialize(&tree, &registry, &SerializeOptions::default())
    }

    fn assert_stable(markup: &str) {
        assert_eq!(round_trip(markup), markup);
    }

    // ============ Round trips ============

    #[test]
    fn heading_and_paragraph_round_trip() {
        assert_stable("# Title\n\nplain *em* **strong** ~~strike~~ text\n");
    }

    #[test]
    fn nested_list_round_trips() {
        assert_stable("- one\n- two\n  - nested\n- three\n");
    }

    #[test]
    fn ordered_list_round_trips_with_start_offset() {
        assert_stable("3. c\n4. d\n");
    }

    #[test]
    fn nested_list_under_ordered_parent_round_trips() {
        assert_stable("1. parent\n   - child\n2. next\n");
    }

    #[test]
    fn quote_with_blank_line_round_trips() {
        assert_stable("> first\n> \n> second\n");
    }

    #[test]
    fn quote_with_heading_round_trips() {
        assert_stable("> # Head\n> \n> body\n");
    }

    #[test]
    fn code_fence_entities_round_trip() {
        assert_stable("```rust\nif a < b && c > d {}\n```\n");
    }

    #[test]
    fn inline_code_round_trips() {
        assert_stable("run `a < b` now\n");
    }

    #[test]
    fn table_round_trips() {
        assert_stable("| a | b |\n| --- | --- |\n| 1 | 2 |\n| 3 | 4 |\n");
    }

    #[test]
    fn link_and_underline_round_trip() {
        assert_stable("an <u>underlined</u> [link](https://example.com) here\n");
    }

    #[test]
    fn formulas_round_trip() {
        assert_stable("inline $E=mc^2$ then\n\n$$\\int_0^1 x\\,dx$$\n");
    }

    #[test]
    fn rule_round_trips() {
        assert_stable("above\n\n---\n\nbelow\n");
    }

    #[test]
    fn tagged_fence_round_trips_through_the_registry() {
        assert_stable("# Title\n\n```mermaid\ngraph TD;\nA-->B\n```\n\ntail\n");
    }

    #[test]
    fn colon_fence_round_trips_through_the_registry() {
        assert_stable("::: math\n\\frac{a}{b}\n:::\n");
    }

    // ============ Normalization ============

    #[test]
    fn indented_code_normalizes_to_a_fence() {
        assert_eq!(round_trip("    indented\n"), "```\nindented\n```\n");
    }

    #[test]
    fn setext_heading_normalizes_to_atx() {
        assert_eq!(round_trip("Title\n=====\n"), "# Title\n");
    }

    #[test]
    fn quoted_sibling_blocks_gain_a_separating_blank_line() {
        assert_eq!(round_trip("> # Head\n> body\n"), "> # Head\n> \n> body\n");
    }

    #[test]
    fn collapse_only_touches_long_blank_runs() {
        assert_eq!(collapse_blank_runs("a\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\n\n\n\n\nb"), "a\n\nb");
    }

    // ============ Single-block rules ============

    #[test]
    fn table_cell_pipes_are_escaped() {
        let tree = RenderTree {
            blocks: vec![Block::Table(TableBlock {
                header: vec![vec![Inline::Text("a|b".to_string())]],
                rows: vec![vec![vec![Inline::Text("c".to_string())]]],
            })],
        };
        let markup = serialize(&tree, &PlaceholderRegistry::new(), &SerializeOptions::default());
        assert_eq!(markup, "| a\\|b |\n| --- |\n| c |\n");
    }

    #[test]
    fn ragged_table_rows_are_normalized_to_the_header_width() {
        let tree = RenderTree {
            blocks: vec![Block::Table(TableBlock {
                header: vec![
                    vec![Inline::Text("a".to_string())],
                    vec![Inline::Text("b".to_string())],
                ],
                rows: vec![
                    vec![vec![Inline::Text("short".to_string())]],
                    vec![
                        vec![Inline::Text("1".to_string())],
                        vec![Inline::Text("2".to_string())],
                        vec![Inline::Text("extra".to_string())],
                    ],
                ],
            })],
        };
        let markup = serialize(&tree, &PlaceholderRegistry::new(), &SerializeOptions::default());
        assert_eq!(
            markup,
            "| a | b |\n| --- | --- |\n| short |  |\n| 1 | 2 |\n"
        );
    }

    #[test]
    fn image_without_attributes_takes_the_compact_form() {
        let tree = RenderTree {
            blocks: vec![Block::Image(ImageBlock {
                src: "img.png".to_string(),
                alt: "alt text".to_string(),
                width: None,
                height: None,
                align: None,
            })],
        };
        let markup = serialize(&tree, &PlaceholderRegistry::new(), &SerializeOptions::default());
        assert_eq!(markup, "![alt text](img.png)\n");
    }

    #[test]
    fn sized_image_takes_the_explicit_tag_form() {
        let tree = RenderTree {
            blocks: vec![Block::Image(ImageBlock {
                src: "pic.png".to_string(),
                alt: "A pic".to_string(),
                width: Some(320),
                height: None,
                align: Some(ImageAlign::Center),
            })],
        };
        let markup = serialize(&tree, &PlaceholderRegistry::new(), &SerializeOptions::default());
        assert_eq!(
            markup,
            "<img src=\"pic.png\" alt=\"A pic\" width=\"320\" \
             style=\"display: block; margin-left: auto; margin-right: auto;\">\n"
        );
    }

    #[test]
    fn sized_image_round_trips_byte_identically() {
        assert_stable(
            "<img src=\"pic.png\" alt=\"A pic\" width=\"320\" \
             style=\"display: block; margin-left: auto; margin-right: auto;\">\n",
        );
    }

    #[test]
    fn attribute_emission_can_be_disabled() {
        let tree = RenderTree {
            blocks: vec![Block::Image(ImageBlock {
                src: "pic.png".to_string(),
                alt: "A pic".to_string(),
                width: Some(320),
                height: None,
                align: None,
            })],
        };
        let options = SerializeOptions {
            explicit_image_attrs: false,
        };
        let markup = serialize(&tree, &PlaceholderRegistry::new(), &options);
        assert_eq!(markup, "![A pic](pic.png)\n");
    }

    #[test]
    fn missing_placeholder_id_reproduces_the_marker() {
        let tree = RenderTree {
            blocks: vec![Block::Placeholder(PlaceholderRef {
                id: PlaceholderId(9),
                kind: PlaceholderKind::Diagram,
                fence: FenceStyle::Backtick,
            })],
        };
        let markup = serialize(&tree, &PlaceholderRegistry::new(), &SerializeOptions::default());
        assert_eq!(
            markup,
            "<div data-embed=\"diagram\" data-id=\"9\" data-fence=\"backtick\"></div>\n"
        );
    }

    #[test]
    fn code_span_grows_its_delimiter_past_inner_backticks() {
        assert_eq!(code_span("plain"), "`plain`");
        assert_eq!(code_span("a`b"), "``a`b``");
        assert_eq!(code_span("`lead"), "`` `lead ``");
    }

    #[test]
    fn empty_tree_serializes_to_an_empty_string() {
        let markup = serialize(
            &RenderTree::new(),
            &PlaceholderRegistry::new(),
            &SerializeOptions::default(),
        );
        assert_eq!(markup, "");
    }
}
