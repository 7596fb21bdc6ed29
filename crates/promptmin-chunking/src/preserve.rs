use crate::markdown::heading_text;
use promptmin_core::{Chunk, ConfigError, PreserveSelector};
use regex::Regex;
use std::sync::OnceLock;

fn keep_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)<!--\s*(?:promptmin:)?keep\s*-->|^[ \t]*#[ \t]*keep[ \t]*\r?$")
            .expect("valid regex")
    })
}

/// True when the chunk carries an explicit keep marker: an
/// `<!-- keep -->` / `<!-- promptmin:keep -->` comment or a `# keep` line.
pub fn has_keep_marker(text: &str) -> bool {
    keep_marker().is_match(text)
}

#[derive(Debug, Clone)]
pub(crate) enum CompiledSelector {
    Heading(String),
    KeepTag,
    Regex(Regex),
}

impl CompiledSelector {
    pub(crate) fn compile(selector: &PreserveSelector) -> Result<Self, ConfigError> {
        match selector {
            PreserveSelector::Heading { value } => {
                Ok(CompiledSelector::Heading(value.trim().to_string()))
            }
            PreserveSelector::Tag { value } => {
                if value.trim().eq_ignore_ascii_case("keep") {
                    Ok(CompiledSelector::KeepTag)
                } else {
                    Err(ConfigError::Invalid(format!(
                        "unsupported preserve tag: {value}"
                    )))
                }
            }
            PreserveSelector::Regex { pattern } => Regex::new(pattern)
                .map(CompiledSelector::Regex)
                .map_err(|err| {
                    ConfigError::Invalid(format!("invalid preserve regex {pattern}: {err}"))
                }),
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            CompiledSelector::Heading(target) => {
                let Some(first) = text.lines().find(|line| !line.trim().is_empty()) else {
                    return false;
                };
                heading_text(first).is_some_and(|heading| heading == target)
            }
            CompiledSelector::KeepTag => has_keep_marker(text),
            CompiledSelector::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Marks chunks that must survive reduction. Only ever sets `preserve`.
pub(crate) fn apply_preserve(chunks: &mut [Chunk], selectors: &[CompiledSelector]) {
    for chunk in chunks.iter_mut() {
        if chunk.preserve {
            continue;
        }
        if has_keep_marker(&chunk.text)
            || selectors
                .iter()
                .any(|selector| selector.matches(&chunk.text))
        {
            chunk.preserve = true;
        }
    }
}
