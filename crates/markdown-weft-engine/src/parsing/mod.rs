//! Markup parsing.
//!
//! [`parse_markup`] converts placeholder-stripped markup into a
//! [`RenderTree`] by folding the pulldown-cmark event stream through a stack
//! of block contexts. Tables, strikethrough and dollar-delimited math are
//! enabled in the grammar; formula events with empty bodies degrade back to
//! literal text so stray currency signs never become formula nodes.
//!
//! Three constructs the grammar treats as raw HTML are recognized into
//! dedicated nodes on the way through: placeholder marker lines (back into
//! [`Block::Placeholder`]), explicit `<img>` tags previously emitted for
//! sized or aligned images (back into [`Block::Image`]), and inline
//! `<u>`/`</u>` passthrough tags (into [`Inline::Underline`]). Any other raw
//! HTML survives as literal text, which keeps it byte-stable across a round
//! trip.

use std::mem;
use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;

use crate::placeholder::PlaceholderRef;
use crate::tree::{
    Block, ImageAlign, ImageBlock, Inline, ListBlock, ListItem, RenderTree, TableBlock,
    plain_text,
};

/// Parse placeholder-stripped markup into a render tree.
///
/// Never fails: malformed input degrades to literal text rather than an
/// error.
pub fn parse_markup(markup: &str) -> RenderTree {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_MATH);

    let mut builder = TreeBuilder::new();
    for event in Parser::new_ext(markup, options) {
        builder.event(event);
    }
    builder.finish()
}

// ============ Inline assembly ============

enum FrameKind {
    Root,
    Emphasis,
    Strong,
    Strike,
    Underline,
    Link { href: String },
    Image { src: String },
}

struct Frame {
    kind: FrameKind,
    content: Vec<Inline>,
}

/// Builds one block's inline content from the event stream. Containers
/// (emphasis, links, underline tags) are kept as a frame stack; text runs
/// merge into the top frame.
struct InlineCollector {
    frames: Vec<Frame>,
    image_count: usize,
    first_image: Option<(ImageBlock, String)>,
}

impl InlineCollector {
    fn new() -> Self {
        Self {
            frames: vec![Frame {
                kind: FrameKind::Root,
                content: Vec::new(),
            }],
            image_count: 0,
            first_image: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.frames.len() == 1 && self.frames[0].content.is_empty()
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            if let Some(Inline::Text(existing)) = frame.content.last_mut() {
                existing.push_str(text);
            } else {
                frame.content.push(Inline::Text(text.to_string()));
            }
        }
    }

    fn push(&mut self, inline: Inline) {
        if let Inline::Text(text) = &inline {
            self.push_text(text);
            return;
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.content.push(inline);
        }
    }

    fn open(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            content: Vec::new(),
        });
    }

    fn close_emphasis(&mut self) {
        self.close_wrapping(|kind| matches!(kind, FrameKind::Emphasis), Inline::Emphasis);
    }

    fn close_strong(&mut self) {
        self.close_wrapping(|kind| matches!(kind, FrameKind::Strong), Inline::Strong);
    }

    fn close_strike(&mut self) {
        self.close_wrapping(|kind| matches!(kind, FrameKind::Strike), Inline::Strike);
    }

    fn close_wrapping(
        &mut self,
        matches_kind: fn(&FrameKind) -> bool,
        wrap: fn(Vec<Inline>) -> Inline,
    ) {
        self.unwind_until(matches_kind);
        if self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                self.push(wrap(frame.content));
            }
        }
    }

    fn close_link(&mut self) {
        self.unwind_until(|kind| matches!(kind, FrameKind::Link { .. }));
        if self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                if let FrameKind::Link { href } = frame.kind {
                    self.push(Inline::Link {
                        href,
                        content: frame.content,
                    });
                }
            }
        }
    }

    fn close_image(&mut self) {
        self.unwind_until(|kind| matches!(kind, FrameKind::Image { .. }));
        if self.frames.len() > 1 {
            if let Some(frame) = self.frames.pop() {
                if let FrameKind::Image { src } = frame.kind {
                    let alt = plain_text(&frame.content);
                    let literal = format!("![{alt}]({src})");
                    self.image_count += 1;
                    if self.image_count == 1 {
                        self.first_image = Some((
                            ImageBlock {
                                src,
                                alt,
                                width: None,
                                height: None,
                                align: None,
                            },
                            literal.clone(),
                        ));
                    }
                    self.push_text(&literal);
                }
            }
        }
    }

    fn close_underline(&mut self) {
        if matches!(
            self.frames.last().map(|frame| &frame.kind),
            Some(FrameKind::Underline)
        ) {
            if let Some(frame) = self.frames.pop() {
                self.push(Inline::Underline(frame.content));
            }
        } else {
            // stray close tag stays literal
            self.push_text("</u>");
        }
    }

    /// Fold stray frames (in practice: underline tags the author never
    /// closed inside this container) back into their parent without losing
    /// content.
    fn unwind_until(&mut self, matches_kind: fn(&FrameKind) -> bool) {
        while self.frames.len() > 1 {
            let top_matches = self
                .frames
                .last()
                .map(|frame| matches_kind(&frame.kind))
                .unwrap_or(false);
            if top_matches {
                return;
            }
            self.unwind_top();
        }
    }

    fn unwind_top(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        if let Some(frame) = self.frames.pop() {
            match frame.kind {
                FrameKind::Root => {}
                FrameKind::Emphasis => self.push(Inline::Emphasis(frame.content)),
                FrameKind::Strong => self.push(Inline::Strong(frame.content)),
                FrameKind::Strike => self.push(Inline::Strike(frame.content)),
                FrameKind::Underline => {
                    // reopen as literal so an unclosed tag round-trips
                    self.push_text("<u>");
                    for inline in frame.content {
                        self.push(inline);
                    }
                }
                FrameKind::Link { href } => self.push(Inline::Link {
                    href,
                    content: frame.content,
                }),
                FrameKind::Image { src } => {
                    let alt = plain_text(&frame.content);
                    self.push_text(&format!("![{alt}]({src})"));
                }
            }
        }
    }

    fn append_joined(&mut self, content: Vec<Inline>) {
        if !self.is_empty() {
            self.push_text(" ");
        }
        for inline in content {
            self.push(inline);
        }
    }

    fn finish(mut self) -> (Vec<Inline>, Option<(ImageBlock, String)>) {
        while self.frames.len() > 1 {
            self.unwind_top();
        }
        let content = self.frames.pop().map(|frame| frame.content).unwrap_or_default();
        let sole_image = if self.image_count == 1 {
            self.first_image
        } else {
            None
        };
        (content, sole_image)
    }

    fn finish_content(self) -> Vec<Inline> {
        self.finish().0
    }
}

// ============ Block contexts ============

#[derive(Default)]
struct TableCtx {
    header: Vec<Vec<Inline>>,
    rows: Vec<Vec<Vec<Inline>>>,
    row: Vec<Vec<Inline>>,
    cell: Option<InlineCollector>,
}

enum Ctx {
    Paragraph(InlineCollector),
    Heading { level: u8, collector: InlineCollector },
    Quote(Vec<Block>),
    List { ordered: bool, start: u64, items: Vec<ListItem> },
    Item { collector: InlineCollector, children: Vec<ListBlock> },
    Code { language: Option<String>, body: String },
    Table(TableCtx),
    Html(String),
}

struct TreeBuilder {
    blocks: Vec<Block>,
    stack: Vec<Ctx>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                let code = html_escape::encode_text(&*code).into_owned();
                self.with_collector(move |collector| collector.push(Inline::Code(code)));
            }
            Event::InlineMath(source) => self.formula(&source, false),
            Event::DisplayMath(source) => self.formula(&source, true),
            Event::Html(html) => self.html_chunk(&html),
            Event::InlineHtml(html) => self.inline_html(&html),
            Event::SoftBreak => {
                let in_paragraph = matches!(self.stack.last(), Some(Ctx::Paragraph(_)));
                let text = if in_paragraph { "\n" } else { " " };
                self.with_collector(move |collector| collector.push_text(text));
            }
            Event::HardBreak => {
                let in_paragraph = matches!(self.stack.last(), Some(Ctx::Paragraph(_)));
                let text = if in_paragraph { "  \n" } else { " " };
                self.with_collector(move |collector| collector.push_text(text));
            }
            Event::Rule => self.finish_block(Block::Rule),
            // footnotes and task lists are not enabled in the grammar
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => self.stack.push(Ctx::Paragraph(InlineCollector::new())),
            Tag::Heading { level, .. } => self.stack.push(Ctx::Heading {
                level: level as u8,
                collector: InlineCollector::new(),
            }),
            Tag::BlockQuote(_) => self.stack.push(Ctx::Quote(Vec::new())),
            Tag::CodeBlock(kind) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => {
                        let info = info.trim();
                        if info.is_empty() {
                            None
                        } else {
                            Some(info.split_whitespace().next().unwrap_or(info).to_string())
                        }
                    }
                    CodeBlockKind::Indented => None,
                };
                self.stack.push(Ctx::Code {
                    language,
                    body: String::new(),
                });
            }
            Tag::List(start) => self.stack.push(Ctx::List {
                ordered: start.is_some(),
                start: start.unwrap_or(1),
                items: Vec::new(),
            }),
            Tag::Item => self.stack.push(Ctx::Item {
                collector: InlineCollector::new(),
                children: Vec::new(),
            }),
            Tag::Table(_) => self.stack.push(Ctx::Table(TableCtx::default())),
            Tag::TableHead | Tag::TableRow => {
                if let Some(Ctx::Table(table)) = self.stack.last_mut() {
                    table.row.clear();
                }
            }
            Tag::TableCell => {
                if let Some(Ctx::Table(table)) = self.stack.last_mut() {
                    table.cell = Some(InlineCollector::new());
                }
            }
            Tag::Emphasis => self.with_collector(|collector| collector.open(FrameKind::Emphasis)),
            Tag::Strong => self.with_collector(|collector| collector.open(FrameKind::Strong)),
            Tag::Strikethrough => {
                self.with_collector(|collector| collector.open(FrameKind::Strike));
            }
            Tag::Link { dest_url, .. } => {
                let href = dest_url.to_string();
                self.with_collector(move |collector| collector.open(FrameKind::Link { href }));
            }
            Tag::Image { dest_url, .. } => {
                let src = dest_url.to_string();
                self.with_collector(move |collector| collector.open(FrameKind::Image { src }));
            }
            Tag::HtmlBlock => self.stack.push(Ctx::Html(String::new())),
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if let Some(Ctx::Paragraph(collector)) = self.stack.pop() {
                    let block = paragraph_block(collector);
                    self.finish_block(block);
                }
            }
            TagEnd::Heading(_) => {
                if let Some(Ctx::Heading { level, collector }) = self.stack.pop() {
                    self.finish_block(Block::Heading {
                        level,
                        content: collector.finish_content(),
                    });
                }
            }
            TagEnd::BlockQuote(_) => {
                if let Some(Ctx::Quote(blocks)) = self.stack.pop() {
                    self.finish_block(Block::Quote { blocks });
                }
            }
            TagEnd::CodeBlock => {
                if let Some(Ctx::Code { language, body }) = self.stack.pop() {
                    self.finish_block(Block::Code {
                        language,
                        body: html_escape::encode_text(&body).into_owned(),
                    });
                }
            }
            TagEnd::List(_) => {
                if let Some(Ctx::List {
                    ordered,
                    start,
                    items,
                }) = self.stack.pop()
                {
                    self.finish_block(Block::List(ListBlock {
                        ordered,
                        start,
                        items,
                    }));
                }
            }
            TagEnd::Item => {
                if let Some(Ctx::Item {
                    collector,
                    children,
                }) = self.stack.pop()
                {
                    let item = ListItem {
                        content: collector.finish_content(),
                        children,
                    };
                    if let Some(Ctx::List { items, .. }) = self.stack.last_mut() {
                        items.push(item);
                    } else {
                        self.finish_block(Block::Paragraph {
                            content: item.content,
                        });
                    }
                }
            }
            TagEnd::Table => {
                if let Some(Ctx::Table(table)) = self.stack.pop() {
                    self.finish_block(Block::Table(TableBlock {
                        header: table.header,
                        rows: table.rows,
                    }));
                }
            }
            TagEnd::TableHead => {
                if let Some(Ctx::Table(table)) = self.stack.last_mut() {
                    table.header = mem::take(&mut table.row);
                }
            }
            TagEnd::TableRow => {
                if let Some(Ctx::Table(table)) = self.stack.last_mut() {
                    let row = mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            TagEnd::TableCell => {
                if let Some(Ctx::Table(table)) = self.stack.last_mut() {
                    if let Some(collector) = table.cell.take() {
                        table.row.push(collector.finish_content());
                    }
                }
            }
            TagEnd::Emphasis => self.with_collector(InlineCollector::close_emphasis),
            TagEnd::Strong => self.with_collector(InlineCollector::close_strong),
            TagEnd::Strikethrough => self.with_collector(InlineCollector::close_strike),
            TagEnd::Link => self.with_collector(InlineCollector::close_link),
            TagEnd::Image => self.with_collector(InlineCollector::close_image),
            TagEnd::HtmlBlock => {
                if let Some(Ctx::Html(raw)) = self.stack.pop() {
                    let block = classify_html_block(&raw);
                    self.finish_block(block);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        match self.stack.last_mut() {
            Some(Ctx::Code { body, .. }) => body.push_str(text),
            Some(Ctx::Html(raw)) => raw.push_str(text),
            Some(Ctx::Paragraph(collector))
            | Some(Ctx::Heading { collector, .. })
            | Some(Ctx::Item { collector, .. }) => collector.push_text(text),
            Some(Ctx::Table(table)) => {
                if let Some(cell) = table.cell.as_mut() {
                    cell.push_text(text);
                }
            }
            _ => {}
        }
    }

    fn with_collector(&mut self, f: impl FnOnce(&mut InlineCollector)) {
        match self.stack.last_mut() {
            Some(Ctx::Paragraph(collector))
            | Some(Ctx::Heading { collector, .. })
            | Some(Ctx::Item { collector, .. }) => f(collector),
            Some(Ctx::Table(table)) => {
                if let Some(cell) = table.cell.as_mut() {
                    f(cell);
                }
            }
            _ => {}
        }
    }

    fn formula(&mut self, source: &str, display: bool) {
        if source.trim().is_empty() {
            // empty bodies stay literal so stray dollar signs survive
            let literal = if display {
                format!("$${source}$$")
            } else {
                format!("${source}$")
            };
            self.with_collector(move |collector| collector.push_text(&literal));
            return;
        }
        let inline = Inline::Formula {
            source: source.to_string(),
            display,
        };
        self.with_collector(move |collector| collector.push(inline));
    }

    fn inline_html(&mut self, html: &str) {
        match html.trim() {
            "<u>" => self.with_collector(|collector| collector.open(FrameKind::Underline)),
            "</u>" => self.with_collector(InlineCollector::close_underline),
            _ => {
                let literal = html.to_string();
                self.with_collector(move |collector| collector.push_text(&literal));
            }
        }
    }

    fn html_chunk(&mut self, html: &str) {
        if let Some(Ctx::Html(raw)) = self.stack.last_mut() {
            raw.push_str(html);
        } else {
            let block = classify_html_block(html);
            self.finish_block(block);
        }
    }

    /// Route a completed block into the innermost container, or to the top
    /// level.
    fn finish_block(&mut self, block: Block) {
        match self.stack.last_mut() {
            Some(Ctx::Quote(blocks)) => blocks.push(block),
            Some(Ctx::Item {
                collector,
                children,
            }) => match block {
                Block::List(list) => children.push(list),
                Block::Paragraph { content } => collector.append_joined(content),
                Block::Code { body, .. } => {
                    log::warn!("flattening a code block inside a list item to inline code");
                    if !collector.is_empty() {
                        collector.push_text(" ");
                    }
                    collector.push(Inline::Code(body.trim_end().to_string()));
                }
                other => {
                    log::warn!("flattening unsupported block content inside a list item");
                    let text = flatten_block(&other);
                    if !text.is_empty() {
                        if !collector.is_empty() {
                            collector.push_text(" ");
                        }
                        collector.push_text(&text);
                    }
                }
            },
            Some(Ctx::Table(_)) => {
                log::warn!("discarding block-level content inside a table cell");
            }
            _ => self.blocks.push(block),
        }
    }

    fn finish(mut self) -> RenderTree {
        while let Some(ctx) = self.stack.pop() {
            if let Some(block) = leftover_block(ctx) {
                self.finish_block(block);
            }
        }
        RenderTree {
            blocks: self.blocks,
        }
    }
}

/// Decide what a finished paragraph context becomes: a display formula on its
/// own line is hoisted to a formula block, a lone image becomes an image
/// block, anything else stays a paragraph.
fn paragraph_block(collector: InlineCollector) -> Block {
    let (mut content, sole_image) = collector.finish();

    if matches!(content.as_slice(), [Inline::Formula { display: true, .. }]) {
        if let Some(Inline::Formula { source, .. }) = content.pop() {
            return Block::Formula { source };
        }
    }

    if let Some((image, literal)) = sole_image {
        if matches!(content.as_slice(), [Inline::Text(text)] if text == &literal) {
            return Block::Image(image);
        }
    }

    Block::Paragraph { content }
}

/// A block context that was still open when the event stream ended.
fn leftover_block(ctx: Ctx) -> Option<Block> {
    match ctx {
        Ctx::Paragraph(collector) => Some(paragraph_block(collector)),
        Ctx::Heading { level, collector } => Some(Block::Heading {
            level,
            content: collector.finish_content(),
        }),
        Ctx::Quote(blocks) => Some(Block::Quote { blocks }),
        Ctx::List {
            ordered,
            start,
            items,
        } => Some(Block::List(ListBlock {
            ordered,
            start,
            items,
        })),
        Ctx::Item { collector, .. } => Some(Block::Paragraph {
            content: collector.finish_content(),
        }),
        Ctx::Code { language, body } => Some(Block::Code {
            language,
            body: html_escape::encode_text(&body).into_owned(),
        }),
        Ctx::Table(table) => Some(Block::Table(TableBlock {
            header: table.header,
            rows: table.rows,
        })),
        Ctx::Html(raw) => Some(classify_html_block(&raw)),
    }
}

fn flatten_block(block: &Block) -> String {
    match block {
        Block::Heading { content, .. } | Block::Paragraph { content } => plain_text(content),
        Block::Quote { blocks } => blocks
            .iter()
            .map(flatten_block)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Block::Image(image) => format!("![{}]({})", image.alt, image.src),
        Block::Formula { source } => format!("$${source}$$"),
        Block::Rule => "---".to_string(),
        Block::Placeholder(reference) => reference.marker_line(),
        Block::List(_) | Block::Code { .. } | Block::Table(_) => String::new(),
    }
}

/// Sort raw block HTML into the nodes the serializer can regenerate.
fn classify_html_block(raw: &str) -> Block {
    let trimmed = raw.trim();
    if let Some(reference) = PlaceholderRef::parse_marker_line(trimmed) {
        return Block::Placeholder(reference);
    }
    if let Some(image) = parse_img_tag(trimmed) {
        return Block::Image(image);
    }
    Block::Paragraph {
        content: vec![Inline::Text(trimmed.to_string())],
    }
}

fn parse_img_tag(text: &str) -> Option<ImageBlock> {
    static IMG: OnceLock<Regex> = OnceLock::new();
    let img = IMG.get_or_init(|| Regex::new(r"^<img\s+[^>]*>$").expect("Invalid img tag regex"));
    if !img.is_match(text) {
        return None;
    }
    let src = attr_value(text, "src")?;
    let alt = attr_value(text, "alt").unwrap_or_default();
    Some(ImageBlock {
        src: html_escape::decode_html_entities(&src).into_owned(),
        alt: html_escape::decode_html_entities(&alt).into_owned(),
        width: attr_value(text, "width").and_then(|value| value.parse().ok()),
        height: attr_value(text, "height").and_then(|value| value.parse().ok()),
        align: attr_value(text, "style").as_deref().and_then(parse_alignment),
    })
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    let attr = ATTR.get_or_init(|| {
        Regex::new(r#"([a-z]+)="([^"]*)""#).expect("Invalid attribute regex")
    });
    attr.captures_iter(tag)
        .find(|caps| &caps[1] == name)
        .map(|caps| caps[2].to_string())
}

fn parse_alignment(style: &str) -> Option<ImageAlign> {
    if style.contains("margin-left: auto") {
        if style.contains("margin-right: auto") {
            Some(ImageAlign::Center)
        } else {
            Some(ImageAlign::Right)
        }
    } else if style.contains("margin-left: 0") {
        Some(ImageAlign::Left)
    } else {
        None
    }
}
