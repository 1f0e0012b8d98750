//! Column layout derivation and line slicing.
//!
//! Column boundaries come from the separator line: every contiguous run of
//! the marker character is one column, starting at the run's first character.
//! All offsets are in characters, not bytes.

use crate::table::Column;

/// Returns `true` if `line` consists only of `marker` runs and whitespace.
pub(crate) fn is_separator_line(line: &str, marker: char) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|ch| ch == marker || ch.is_whitespace())
}

/// Returns `(start, width)` for each run of `marker` in `line`.
pub(crate) fn marker_runs(line: &str, marker: char) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize)> = None;

    for (pos, ch) in line.chars().enumerate() {
        if ch == marker {
            current = match current {
                Some((start, width)) => Some((start, width + 1)),
                None => Some((pos, 1)),
            };
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

/// One line cut into cells along a column layout.
#[derive(Debug)]
pub(crate) struct SlicedLine<'a> {
    /// Trimmed cell text, one entry per column.
    pub cells: Vec<&'a str>,
    /// Index of the first column whose leading gap holds non-whitespace text.
    pub misaligned_at: Option<usize>,
}

/// Cuts `line` into one trimmed cell per column.
///
/// Cells past the end of the line are empty. The last column extends to the
/// end of the line so that overlong trailing text is kept rather than cut.
/// A value that runs across its column's right edge keeps the overflowing
/// characters up to the next whitespace or the next column's start. Any other
/// text found between two columns marks the line as misaligned.
pub(crate) fn slice_line<'a>(line: &'a str, columns: &[Column]) -> SlicedLine<'a> {
    let chars: Vec<char> = line.chars().collect();
    // Byte offset of every char boundary, including the end of the line.
    let bounds: Vec<usize> = line
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(line.len()))
        .collect();
    let char_len = chars.len();
    let byte_range = |from: usize, to: usize| -> &'a str {
        let from = from.min(char_len);
        let to = to.clamp(from, char_len);
        &line[bounds[from]..bounds[to]]
    };
    let is_text = |pos: usize| chars.get(pos).is_some_and(|ch| !ch.is_whitespace());

    let mut cells = Vec::with_capacity(columns.len());
    let mut misaligned_at = None;
    let mut gap_start = 0;

    for (index, column) in columns.iter().enumerate() {
        let start = column.start.max(gap_start);
        if misaligned_at.is_none() && !byte_range(gap_start, start).trim().is_empty() {
            misaligned_at = Some(index);
        }

        let end = match columns.get(index + 1) {
            None => char_len,
            Some(next) => {
                let mut end = column.end();
                if end > 0 && is_text(end - 1) {
                    while end < next.start && is_text(end) {
                        end += 1;
                    }
                }
                end
            }
        };
        cells.push(byte_range(start, end).trim());
        gap_start = end;
    }

    SlicedLine {
        cells,
        misaligned_at,
    }
}

/// Number of leading whitespace characters in `line`.
pub(crate) fn indent_width(line: &str) -> usize {
    line.chars().take_while(|ch| ch.is_whitespace()).count()
}
