//! Compact rendering of line-number lists.

/// Render ascending, unique line numbers as comma-separated ranges.
///
/// Maximal runs of consecutive numbers become `start...end`; isolated numbers
/// stay as they are. `[3, 4, 5, 9, 10, 12]` renders as `3...5, 9...10, 12`.
pub fn format_line_ranges(lines: &[u32]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = lines.iter().copied();

    let Some(first) = iter.next() else {
        return String::new();
    };

    let mut start = first;
    let mut end = first;
    for line in iter {
        if end.checked_add(1) == Some(line) {
            end = line;
            continue;
        }
        parts.push(render_run(start, end));
        start = line;
        end = line;
    }
    parts.push(render_run(start, end));

    parts.join(", ")
}

fn render_run(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}...{}", start, end)
    }
}
