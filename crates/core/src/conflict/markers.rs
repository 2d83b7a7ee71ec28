//! Detection of leftover conflict markers in resolved files.

const MARKERS: [&str; 4] = ["<<<<<<<", "|||||||", "=======", ">>>>>>>"];

/// Whether `content` has a line that starts with a conflict marker.
///
/// Markers are exactly seven characters, followed by whitespace or end of line,
/// so lines such as `========` (a Markdown heading rule) do not count.
pub fn has_conflict_markers(content: &[u8]) -> bool {
    content
        .split(|b| *b == b'\n')
        .any(|line| MARKERS.iter().any(|m| is_marker_line(line, m.as_bytes())))
}

fn is_marker_line(line: &[u8], marker: &[u8]) -> bool {
    match line.strip_prefix(marker) {
        Some(rest) => rest.first().map_or(true, |b| b.is_ascii_whitespace()),
        None => false,
    }
}
