//! Pixel-budget word wrap for the cue displays
//!
//! Splits text into lines that fit a fixed-size character display, measuring
//! candidate prefixes through a caller-supplied width function so the same
//! algorithm works against any font or a synthetic measurer in tests.

/// Line rendered when the input is empty or whitespace-only.
pub const EMPTY_PLACEHOLDER: &str = "(empty)";

/// Wrap `text` into at most `screen_height_px / line_height_px` lines.
///
/// Paragraphs (explicit `\n`) are processed in order. Each paragraph is
/// greedily packed: the longest prefix that still measures within
/// `max_width_px` is committed. When not even a single character fits, the
/// line is force-broken at `max_width_px / 6` characters so a run of wide
/// glyphs cannot stall progress. Text past the line budget is dropped.
pub fn wrap_text<F>(
    text: &str,
    max_width_px: u32,
    line_height_px: u32,
    screen_height_px: u32,
    measure: F,
) -> Vec<String>
where
    F: Fn(&str) -> u32,
{
    let max_lines = if line_height_px == 0 {
        0
    } else {
        (screen_height_px / line_height_px) as usize
    };
    if max_lines == 0 {
        return Vec::new();
    }

    if text.trim().is_empty() {
        return vec![EMPTY_PLACEHOLDER.to_string()];
    }

    // Forced break width when no prefix fits (characters-per-line heuristic).
    let fallback_chars = ((max_width_px / 6) as usize).max(1);

    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        if lines.len() >= max_lines {
            break;
        }

        let mut rest = paragraph;
        while !rest.is_empty() && lines.len() < max_lines {
            if measure(rest) <= max_width_px {
                lines.push(rest.to_string());
                break;
            }

            let char_count = rest.chars().count();
            let mut committed = false;
            for break_at in (1..char_count).rev() {
                let (head, tail) = split_at_chars(rest, break_at);
                if measure(head) <= max_width_px {
                    lines.push(head.to_string());
                    rest = tail.trim();
                    committed = true;
                    break;
                }
            }

            if !committed {
                // Not even one character fits the measured width.
                let (head, tail) = split_at_chars(rest, fallback_chars);
                lines.push(head.to_string());
                rest = tail;
            }
        }
    }

    lines
}

/// Split at the `n`-th character boundary (not byte offset).
fn split_at_chars(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    }
}
