//! Spans returned by every splitter are contiguous slices of the input, so
//! concatenating them in order yields the input exactly.

use crate::markdown::{classify_lines, is_list_item, split_lines, Line, LineKind};

pub(crate) fn split_line_spans(text: &str) -> Vec<&str> {
    split_lines(text)
}

pub(crate) fn split_section_spans(text: &str) -> Vec<&str> {
    let lines = classify_lines(text);
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut offset = 0usize;

    for line in &lines {
        if line.kind == LineKind::Heading && offset > start {
            spans.push(&text[start..offset]);
            start = offset;
        }
        offset += line.text.len();
    }
    if start < text.len() {
        spans.push(&text[start..]);
    }
    spans
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    BlankRun,
    Fence,
    Heading,
    List,
    Paragraph,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockSpan<'a> {
    pub text: &'a str,
    pub kind: BlockKind,
}

/// Paragraph, list, heading and fenced-code blocks. Each block carries the
/// blank-line run that follows it; a blank run at the very start of the
/// document is its own block.
pub(crate) fn split_block_spans(text: &str) -> Vec<BlockSpan<'_>> {
    let lines = classify_lines(text);
    let mut spans = Vec::new();
    let mut byte_start = 0usize;
    let mut idx = 0usize;

    while idx < lines.len() {
        let first = idx;
        let kind = match lines[idx].kind {
            LineKind::Blank => {
                idx = skip_while(&lines, idx, |line| line.kind == LineKind::Blank);
                BlockKind::BlankRun
            }
            LineKind::FenceOpen => {
                idx += 1;
                while idx < lines.len() {
                    let kind = lines[idx].kind;
                    idx += 1;
                    if kind == LineKind::FenceClose {
                        break;
                    }
                }
                BlockKind::Fence
            }
            LineKind::Heading => {
                idx += 1;
                BlockKind::Heading
            }
            LineKind::ListItem => {
                idx = skip_while(&lines, idx + 1, |line| {
                    line.kind == LineKind::ListItem || (line.kind == LineKind::Text && line.indented)
                });
                BlockKind::List
            }
            LineKind::Text | LineKind::FenceBody | LineKind::FenceClose => {
                idx = skip_while(&lines, idx + 1, |line| line.kind == LineKind::Text);
                BlockKind::Paragraph
            }
        };
        if kind != BlockKind::BlankRun {
            idx = skip_while(&lines, idx, |line| line.kind == LineKind::Blank);
        }

        let len = lines[first..idx]
            .iter()
            .map(|line| line.text.len())
            .sum::<usize>();
        spans.push(BlockSpan {
            text: &text[byte_start..byte_start + len],
            kind,
        });
        byte_start += len;
    }

    spans
}

fn skip_while<F>(lines: &[Line<'_>], mut idx: usize, keep: F) -> usize
where
    F: Fn(&Line<'_>) -> bool,
{
    while idx < lines.len() && keep(&lines[idx]) {
        idx += 1;
    }
    idx
}

/// Sentences within prose blocks. Fenced code and headings stay whole.
pub(crate) fn split_sentence_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    for block in split_block_spans(text) {
        match block.kind {
            BlockKind::Fence | BlockKind::Heading | BlockKind::BlankRun => spans.push(block.text),
            BlockKind::List | BlockKind::Paragraph => {
                spans.extend(sentences_in_prose(block.text));
            }
        }
    }
    spans
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

fn is_closer(ch: char) -> bool {
    matches!(
        ch,
        '"' | '\'' | ')' | ']' | '}' | '”' | '’' | '»' | '*' | '_' | '`'
    )
}

/// A sentence ends after a terminator run, any closing quotes or brackets,
/// and the whitespace that follows them. A line that opens a new list item
/// also starts a new sentence.
fn sentences_in_prose(text: &str) -> Vec<&str> {
    let chars = text.char_indices().collect::<Vec<_>>();
    let byte_at = |pos: usize| chars.get(pos).map_or(text.len(), |(byte, _)| *byte);
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut pos = 0usize;

    while pos < chars.len() {
        let ch = chars[pos].1;
        if is_terminator(ch) {
            let mut end = pos + 1;
            while end < chars.len() && is_terminator(chars[end].1) {
                end += 1;
            }
            while end < chars.len() && is_closer(chars[end].1) {
                end += 1;
            }
            let ws_start = end;
            while end < chars.len() && chars[end].1.is_whitespace() {
                end += 1;
            }
            if end == chars.len() || end > ws_start {
                let cut = byte_at(end);
                if cut > start {
                    spans.push(&text[start..cut]);
                    start = cut;
                }
            }
            pos = end;
            continue;
        }
        if ch == '\n' {
            let next = byte_at(pos + 1);
            if next > start && next < text.len() && is_list_item(&text[next..]) {
                spans.push(&text[start..next]);
                start = next;
            }
        }
        pos += 1;
    }

    if start < text.len() {
        spans.push(&text[start..]);
    }
    spans
}
