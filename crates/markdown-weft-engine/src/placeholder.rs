//! Opaque embedded-block extraction and reinjection.
//!
//! Diagram and formula sources are fenced regions the generic grammar must
//! never see: parsing their bodies as markdown would corrupt them. Before
//! parsing, [`PlaceholderRegistry::extract`] lifts each tagged fenced block
//! out of the markup and leaves a single marker line behind; the registry
//! owns the id→source mapping for the lifetime of the edit session. On the
//! way back out, the serializer (or [`PlaceholderRegistry::reinject`] for
//! markup-level flows) replaces each marker with its fence family wrapped
//! around the possibly edited source.
//!
//! Two fence families are recognized: triple-backtick (```` ```mermaid ````)
//! and repeated-colon (`::: mermaid`, three or more colons). The fence lines
//! each block arrived with are recorded and reproduced on reinjection, so
//! documents keep whichever style and width their author used.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What an opaque block contains. Selects the fence keyword and tells the
/// rendering surface which editor widget to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceholderKind {
    Diagram,
    Formula,
}

impl PlaceholderKind {
    /// Keyword on the opening fence line.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Diagram => "mermaid",
            Self::Formula => "math",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("mermaid") {
            Some(Self::Diagram)
        } else if word.eq_ignore_ascii_case("math") {
            Some(Self::Formula)
        } else {
            None
        }
    }

    fn as_attr(self) -> &'static str {
        match self {
            Self::Diagram => "diagram",
            Self::Formula => "formula",
        }
    }

    fn from_attr(attr: &str) -> Option<Self> {
        match attr {
            "diagram" => Some(Self::Diagram),
            "formula" => Some(Self::Formula),
            _ => None,
        }
    }
}

/// Which delimiter family fenced a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FenceStyle {
    #[default]
    Backtick,
    Colon,
}

impl FenceStyle {
    fn as_attr(self) -> &'static str {
        match self {
            Self::Backtick => "backtick",
            Self::Colon => "colon",
        }
    }

    fn from_attr(attr: &str) -> Option<Self> {
        match attr {
            "backtick" => Some(Self::Backtick),
            "colon" => Some(Self::Colon),
            _ => None,
        }
    }
}

/// Session-scoped identity of an opaque block. Monotonically assigned, never
/// reused within a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlaceholderId(pub(crate) u32);

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference carried by render-tree nodes: everything about a block
/// except its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderRef {
    pub id: PlaceholderId,
    pub kind: PlaceholderKind,
    pub fence: FenceStyle,
}

impl PlaceholderRef {
    /// The marker line standing in for the block in stripped markup.
    pub(crate) fn marker_line(&self) -> String {
        format!(
            r#"<div data-embed="{}" data-id="{}" data-fence="{}"></div>"#,
            self.kind.as_attr(),
            self.id,
            self.fence.as_attr()
        )
    }

    /// Recognize a marker line. Tolerates surrounding whitespace but nothing
    /// else on the line.
    pub(crate) fn parse_marker_line(line: &str) -> Option<Self> {
        static MARKER: OnceLock<Regex> = OnceLock::new();
        let marker = MARKER.get_or_init(|| {
            Regex::new(
                r#"^<div data-embed="(diagram|formula)" data-id="(\d+)" data-fence="(backtick|colon)"></div>$"#,
            )
            .expect("Invalid marker regex")
        });
        let caps = marker.captures(line.trim())?;
        Some(Self {
            kind: PlaceholderKind::from_attr(&caps[1])?,
            id: PlaceholderId(caps[2].parse().ok()?),
            fence: FenceStyle::from_attr(&caps[3])?,
        })
    }
}

/// An extracted opaque block: the registry's unit of ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderBlock {
    pub id: PlaceholderId,
    pub kind: PlaceholderKind,
    pub fence: FenceStyle,
    pub source: String,
    /// Opening and closing fence lines, reproduced on reinjection.
    opener: String,
    closer: String,
}

impl PlaceholderBlock {
    /// The fenced-markup rendition of this block, between the fence lines it
    /// arrived with (canonical ones for blocks created in-session).
    pub fn to_fenced(&self) -> String {
        let body = if self.source.is_empty() {
            String::new()
        } else {
            format!("{}\n", self.source)
        };
        format!("{}\n{body}{}", self.opener, self.closer)
    }

    fn reference(&self) -> PlaceholderRef {
        PlaceholderRef {
            id: self.id,
            kind: self.kind,
            fence: self.fence,
        }
    }
}

/// Id-indexed side table of opaque block sources for one edit session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderRegistry {
    blocks: BTreeMap<PlaceholderId, PlaceholderBlock>,
    next_id: u32,
}

enum ScanState<'a> {
    Text,
    /// Inside an ordinary code fence; its lines pass through untouched and
    /// tagged fence lines within it are not placeholder openers.
    PlainFence { marker: char, len: usize },
    Placeholder {
        kind: PlaceholderKind,
        fence: FenceStyle,
        opener: &'a str,
        body: Vec<&'a str>,
    },
}

impl PlaceholderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lift every tagged fenced block out of `markup`.
    ///
    /// Returns the stripped markup, with one marker line standing in for each
    /// block, alongside the registry holding the extracted sources. An
    /// unclosed tagged fence runs to end of input rather than dropping
    /// trailing content.
    pub fn extract(markup: &str) -> (String, Self) {
        let mut registry = Self::new();
        let mut out: Vec<String> = Vec::new();
        let mut state = ScanState::Text;

        for line in markup.lines() {
            state = match state {
                ScanState::Text => {
                    if let Some((kind, fence)) = parse_fence_open(line) {
                        ScanState::Placeholder {
                            kind,
                            fence,
                            opener: line.trim(),
                            body: Vec::new(),
                        }
                    } else if let Some((marker, len)) = parse_plain_fence_open(line) {
                        out.push(line.to_string());
                        ScanState::PlainFence { marker, len }
                    } else {
                        out.push(line.to_string());
                        ScanState::Text
                    }
                }
                ScanState::PlainFence { marker, len } => {
                    out.push(line.to_string());
                    if closes_plain_fence(line, marker, len) {
                        ScanState::Text
                    } else {
                        ScanState::PlainFence { marker, len }
                    }
                }
                ScanState::Placeholder { kind, fence, opener, mut body } => {
                    if closes_placeholder(line, fence) {
                        let source = body.join("\n");
                        let reference =
                            registry.register(kind, fence, source.trim(), opener, line.trim());
                        out.push(reference.marker_line());
                        ScanState::Text
                    } else {
                        body.push(line);
                        ScanState::Placeholder { kind, fence, opener, body }
                    }
                }
            };
        }

        if let ScanState::Placeholder { kind, fence, opener, body } = state {
            log::warn!(
                "unclosed {} fence; treating it as running to end of input",
                kind.keyword()
            );
            let source = body.join("\n");
            let closer = match fence {
                FenceStyle::Backtick => "```",
                FenceStyle::Colon => ":::",
            };
            let reference = registry.register(kind, fence, source.trim(), opener, closer);
            out.push(reference.marker_line());
        }

        let mut stripped = out.join("\n");
        if markup.ends_with('\n') && !stripped.is_empty() {
            stripped.push('\n');
        }
        (stripped, registry)
    }

    /// Replace every known marker line in `markup` with its fenced block.
    ///
    /// Markers whose id is missing from the registry are left untouched; data
    /// loss is worse than a visible artifact.
    pub fn reinject(&self, markup: &str) -> String {
        let mut out: Vec<String> = Vec::new();
        for line in markup.lines() {
            match PlaceholderRef::parse_marker_line(line) {
                Some(reference) => match self.blocks.get(&reference.id) {
                    Some(block) => out.push(block.to_fenced()),
                    None => {
                        log::warn!(
                            "placeholder {} missing from registry; leaving its marker in place",
                            reference.id
                        );
                        out.push(line.to_string());
                    }
                },
                None => out.push(line.to_string()),
            }
        }
        let mut result = out.join("\n");
        if markup.ends_with('\n') && !result.is_empty() {
            result.push('\n');
        }
        result
    }

    fn register(
        &mut self,
        kind: PlaceholderKind,
        fence: FenceStyle,
        source: &str,
        opener: &str,
        closer: &str,
    ) -> PlaceholderRef {
        let id = PlaceholderId(self.next_id);
        self.next_id += 1;
        let block = PlaceholderBlock {
            id,
            kind,
            fence,
            source: source.to_string(),
            opener: opener.to_string(),
            closer: closer.to_string(),
        };
        let reference = block.reference();
        self.blocks.insert(id, block);
        reference
    }

    /// Register a block the user created interactively, with canonical fence
    /// lines in the requested family.
    pub fn insert(
        &mut self,
        kind: PlaceholderKind,
        fence: FenceStyle,
        source: &str,
    ) -> PlaceholderRef {
        let keyword = kind.keyword();
        let (opener, closer) = match fence {
            FenceStyle::Backtick => (format!("```{keyword}"), "```"),
            FenceStyle::Colon => (format!("::: {keyword}"), ":::"),
        };
        self.register(kind, fence, source, &opener, closer)
    }

    /// Replace the source of an existing block. Returns false if the id is
    /// unknown.
    pub fn update(&mut self, id: PlaceholderId, source: &str) -> bool {
        match self.blocks.get_mut(&id) {
            Some(block) => {
                block.source = source.to_string();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: PlaceholderId) -> Option<&PlaceholderBlock> {
        self.blocks.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaceholderBlock> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

fn parse_fence_open(line: &str) -> Option<(PlaceholderKind, FenceStyle)> {
    static BACKTICK_OPEN: OnceLock<Regex> = OnceLock::new();
    static COLON_OPEN: OnceLock<Regex> = OnceLock::new();
    let backtick = BACKTICK_OPEN.get_or_init(|| {
        Regex::new(r"^```\s*([A-Za-z]+)\s*$").expect("Invalid backtick fence regex")
    });
    let colon = COLON_OPEN.get_or_init(|| {
        Regex::new(r"^:{3,}\s*([A-Za-z]+)\s*$").expect("Invalid colon fence regex")
    });

    // fences may arrive indented; matching ignores surrounding whitespace
    let line = line.trim();
    if let Some(caps) = backtick.captures(line) {
        let kind = PlaceholderKind::from_keyword(&caps[1])?;
        return Some((kind, FenceStyle::Backtick));
    }
    if let Some(caps) = colon.captures(line) {
        let kind = PlaceholderKind::from_keyword(&caps[1])?;
        return Some((kind, FenceStyle::Colon));
    }
    None
}

fn parse_plain_fence_open(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim();
    for marker in ['`', '~'] {
        let len = trimmed.chars().take_while(|&c| c == marker).count();
        if len >= 3 {
            return Some((marker, len));
        }
    }
    None
}

fn closes_plain_fence(line: &str, marker: char, len: usize) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.len() >= len && trimmed.chars().all(|c| c == marker)
}

fn closes_placeholder(line: &str, fence: FenceStyle) -> bool {
    static BACKTICK_CLOSE: OnceLock<Regex> = OnceLock::new();
    static COLON_CLOSE: OnceLock<Regex> = OnceLock::new();
    match fence {
        FenceStyle::Backtick => BACKTICK_CLOSE
            .get_or_init(|| Regex::new(r"^```\s*$").expect("Invalid backtick close regex"))
            .is_match(line.trim()),
        FenceStyle::Colon => COLON_CLOSE
            .get_or_init(|| Regex::new(r"^:{3,}\s*$").expect("Invalid colon close regex"))
            .is_match(line.trim()),
    }
}
