// File: ./src/codec/fold.rs
//! Content line folding (RFC 5545 section 3.1).

/// Maximum number of characters on one physical line, excluding the line break.
pub const FOLD_WIDTH: usize = 75;

/// Splits a logical line into physical lines joined by CRLF + one space.
///
/// Counts characters rather than octets so a multi-byte character is never cut.
/// Every physical line, the leading space included, stays within [`FOLD_WIDTH`].
pub fn fold_line(line: &str) -> String {
    if line.chars().count() <= FOLD_WIDTH {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + line.len() / FOLD_WIDTH * 3);
    let mut width = 0;
    let mut limit = FOLD_WIDTH;
    for c in line.chars() {
        if width == limit {
            out.push_str("\r\n ");
            width = 0;
            limit = FOLD_WIDTH - 1;
        }
        out.push(c);
        width += 1;
    }
    out
}

/// Reverses folding: returns the logical lines of `raw`.
pub fn unfold(raw: &str) -> Vec<String> {
    unfold_numbered(raw).into_iter().map(|(_, l)| l).collect()
}

/// Like [`unfold`], but each logical line carries the 1-based physical line
/// number it started on.
pub(crate) fn unfold_numbered(raw: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();

    for (idx, physical) in raw.split('\n').enumerate() {
        let physical = physical.strip_suffix('\r').unwrap_or(physical);

        if let Some(rest) = physical
            .strip_prefix(' ')
            .or_else(|| physical.strip_prefix('\t'))
            && let Some((_, last)) = lines.last_mut()
        {
            last.push_str(rest);
            continue;
        }

        if physical.trim().is_empty() {
            continue;
        }
        lines.push((idx + 1, physical.to_string()));
    }

    lines
}
