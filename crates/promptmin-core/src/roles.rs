use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    System,
    Developer,
    User,
}

impl PromptRole {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(PromptRole::System),
            "developer" => Some(PromptRole::Developer),
            "user" => Some(PromptRole::User),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessages {
    pub has_role_blocks: bool,
    pub messages: Vec<PromptMessage>,
}

struct RoleHeader {
    line: usize,
    role: PromptRole,
    inline: Option<String>,
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(system|developer|user):(?:\s*(\|))?\s*(.*)$").expect("valid regex")
    })
}

/// Splits role-tagged prompt text into messages. Untagged text is treated
/// as a single `system` message.
pub fn extract_prompt_messages(prompt: &str) -> PromptMessages {
    let lines = split_lines_keep_ends(prompt);
    let mut headers = Vec::new();

    for (idx, line) in lines.iter().copied().enumerate() {
        let raw = line.strip_suffix('\n').unwrap_or(line);
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let Some(captures) = header_pattern().captures(raw) else {
            continue;
        };
        let Some(role) = captures.get(1).and_then(|m| PromptRole::parse(m.as_str())) else {
            continue;
        };
        let has_pipe = captures.get(2).is_some();
        let tail = captures
            .get(3)
            .map(|m| m.as_str().trim_end())
            .unwrap_or_default();
        // A bare `role:` header opens a block like `role: |` does.
        let inline = if has_pipe || tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        };
        headers.push(RoleHeader {
            line: idx,
            role,
            inline,
        });
    }

    if headers.is_empty() {
        return PromptMessages {
            has_role_blocks: false,
            messages: vec![PromptMessage {
                role: PromptRole::System,
                content: prompt.to_string(),
            }],
        };
    }

    let mut messages = Vec::new();
    let preamble = lines[..headers[0].line].concat();
    if !preamble.trim().is_empty() {
        messages.push(PromptMessage {
            role: PromptRole::System,
            content: preamble,
        });
    }

    for (pos, header) in headers.iter().enumerate() {
        if let Some(inline) = &header.inline {
            messages.push(PromptMessage {
                role: header.role,
                content: inline.clone(),
            });
            continue;
        }
        let end = headers
            .get(pos + 1)
            .map(|next| next.line)
            .unwrap_or(lines.len());
        let body = lines[header.line + 1..end].concat();
        messages.push(PromptMessage {
            role: header.role,
            content: deindent(&body),
        });
    }

    PromptMessages {
        has_role_blocks: true,
        messages,
    }
}

pub(crate) fn split_lines_keep_ends(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn deindent(text: &str) -> String {
    let min_indent = text
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    if min_indent == 0 {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| {
            let indent = (line.len() - line.trim_start().len()).min(min_indent);
            if line.is_char_boundary(indent) {
                &line[indent..]
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
