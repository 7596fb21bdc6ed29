//! Line-level Markdown structure needed by the chunkers: fenced code,
//! headings, list items and blank lines.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind {
    Blank,
    Heading,
    FenceOpen,
    FenceBody,
    FenceClose,
    ListItem,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Line<'a> {
    pub text: &'a str,
    pub kind: LineKind,
    pub indented: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn strip_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn leading_spaces(line: &str) -> usize {
    line.bytes().take_while(|byte| *byte == b' ').count()
}

fn fence_open(line: &str) -> Option<Fence> {
    let line = strip_line_end(line);
    let indent = leading_spaces(line);
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|ch| *ch == '`' || *ch == '~')?;
    let len = rest.chars().take_while(|ch| *ch == marker).count();
    if len < 3 {
        return None;
    }
    if marker == '`' && rest[len..].contains('`') {
        return None;
    }
    Some(Fence { marker, len })
}

fn closes_fence(line: &str, fence: Fence) -> bool {
    let line = strip_line_end(line);
    let indent = leading_spaces(line);
    if indent > 3 {
        return false;
    }
    let rest = &line[indent..];
    let run = rest.chars().take_while(|ch| *ch == fence.marker).count();
    run >= fence.len && rest[run * fence.marker.len_utf8()..].trim().is_empty()
}

/// Heading text when `line` is an ATX heading (`#` to `######`, at most
/// three spaces of indent).
pub(crate) fn heading_text(line: &str) -> Option<&str> {
    let line = strip_line_end(line);
    let indent = leading_spaces(line);
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let hashes = rest.bytes().take_while(|byte| *byte == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let tail = &rest[hashes..];
    if !tail.is_empty() && !tail.starts_with([' ', '\t']) {
        return None;
    }
    Some(tail.trim().trim_end_matches('#').trim_end())
}

pub(crate) fn is_list_item(line: &str) -> bool {
    let rest = line.trim_start_matches([' ', '\t']);
    if let Some(after) = rest.strip_prefix(['-', '*', '+']) {
        return after.starts_with([' ', '\t']);
    }
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || digits > 9 {
        return false;
    }
    let after = &rest[digits..];
    after
        .strip_prefix(['.', ')'])
        .is_some_and(|tail| tail.starts_with([' ', '\t']))
}

pub(crate) fn classify_lines(text: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut open: Option<Fence> = None;

    for line in split_lines(text) {
        let indented = line.starts_with([' ', '\t']);
        let kind = match open {
            Some(fence) => {
                if closes_fence(line, fence) {
                    open = None;
                    LineKind::FenceClose
                } else {
                    LineKind::FenceBody
                }
            }
            None => {
                if line.trim().is_empty() {
                    LineKind::Blank
                } else if let Some(fence) = fence_open(line) {
                    open = Some(fence);
                    LineKind::FenceOpen
                } else if heading_text(line).is_some() {
                    LineKind::Heading
                } else if is_list_item(line) {
                    LineKind::ListItem
                } else {
                    LineKind::Text
                }
            }
        };
        out.push(Line {
            text: line,
            kind,
            indented,
        });
    }

    out
}
