//! Right-to-left script detection.
//!
//! Classifies a whole document as right-to-left or left-to-right from its
//! content so the rendering surface can pick a sensible default layout. Two
//! gates must both pass: the header gate demands genuinely right-to-left
//! lines near the top of the document, and the density gate demands a
//! substantial share of right-to-left characters overall. Together they
//! reject documents that merely quote a right-to-left phrase as well as
//! documents whose title alone is right-to-left.
//!
//! The heuristic is a UX default, not a correctness decision. Everything
//! about it is tunable through [`DirectionOptions`], including turning
//! detection off in favour of a fixed direction.

use serde::{Deserialize, Serialize};

/// Tuning knobs for [`detect`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionOptions {
    /// When false, skip detection and report [`DirectionOptions::default_rtl`].
    pub auto_detect: bool,
    /// Direction reported when detection is disabled.
    pub default_rtl: bool,
    /// How many non-blank lines the header gate examines.
    pub header_lines: usize,
    /// Right-to-left tokens a line needs to qualify in the header gate.
    pub min_rtl_tokens: usize,
    /// Minimum share of right-to-left characters in the whitespace-stripped
    /// text, in `0.0..=1.0`.
    pub min_density: f32,
}

impl Default for DirectionOptions {
    fn default() -> Self {
        Self {
            auto_detect: true,
            default_rtl: false,
            header_lines: 5,
            min_rtl_tokens: 2,
            min_density: 0.30,
        }
    }
}

/// True for characters in the Hebrew, Arabic, Syriac and Arabic-Supplement
/// blocks.
fn is_rtl_char(c: char) -> bool {
    matches!(c,
        '\u{0590}'..='\u{05FF}'
            | '\u{0600}'..='\u{06FF}'
            | '\u{0700}'..='\u{074F}'
            | '\u{0750}'..='\u{077F}')
}

fn line_qualifies(line: &str, min_rtl_tokens: usize) -> bool {
    let mut rtl_tokens = 0;
    for token in line.split_whitespace() {
        if token.chars().any(is_rtl_char) {
            rtl_tokens += 1;
            if rtl_tokens >= min_rtl_tokens {
                return true;
            }
        }
    }
    false
}

/// Decide whether `text` should be laid out right-to-left.
///
/// Empty and whitespace-only input is left-to-right.
pub fn detect(text: &str, opts: &DirectionOptions) -> bool {
    if !opts.auto_detect {
        return opts.default_rtl;
    }

    let header_hit = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(opts.header_lines)
        .any(|line| line_qualifies(line, opts.min_rtl_tokens));
    if !header_hit {
        return false;
    }

    let mut total = 0usize;
    let mut rtl = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_rtl_char(c) {
            rtl += 1;
        }
    }
    if total == 0 {
        return false;
    }
    rtl as f32 / total as f32 >= opts.min_density
}
