mod markdown;
mod preserve;
mod split;

use preserve::{apply_preserve, CompiledSelector};
use promptmin_core::{short_hash, Chunk, ConfigError, PreserveSelector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use preserve::has_keep_marker;

const CHUNK_HASH_CHARS: usize = 8;

/// Decomposition levels, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Sections,
    Blocks,
    Sentences,
    Lines,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Sections,
        Granularity::Blocks,
        Granularity::Sentences,
        Granularity::Lines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Sections => "sections",
            Granularity::Blocks => "blocks",
            Granularity::Sentences => "sentences",
            Granularity::Lines => "lines",
        }
    }

    /// Every level from `sections` down to and including `self`.
    pub fn levels_up_to(self) -> Vec<Granularity> {
        Self::ALL
            .iter()
            .copied()
            .filter(|level| *level <= self)
            .collect()
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            Granularity::Sections => "S",
            Granularity::Blocks => "B",
            Granularity::Sentences => "T",
            Granularity::Lines => "L",
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::Blocks
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "sections" => Ok(Granularity::Sections),
            "blocks" => Ok(Granularity::Blocks),
            "sentences" => Ok(Granularity::Sentences),
            "lines" => Ok(Granularity::Lines),
            other => Err(ConfigError::Invalid(format!(
                "unsupported granularity: {other}"
            ))),
        }
    }
}

/// Splits documents into exactly-reconstructible chunks and marks the ones
/// that must never be removed.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    selectors: Vec<CompiledSelector>,
}

impl Chunker {
    pub fn new(selectors: &[PreserveSelector]) -> Result<Self, ConfigError> {
        let selectors = selectors
            .iter()
            .map(CompiledSelector::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn chunk(&self, document: &str, granularity: Granularity) -> Vec<Chunk> {
        let spans = match granularity {
            Granularity::Sections => split::split_section_spans(document),
            Granularity::Blocks => split::split_block_spans(document)
                .into_iter()
                .map(|span| span.text)
                .collect(),
            Granularity::Sentences => split::split_sentence_spans(document),
            Granularity::Lines => split::split_line_spans(document),
        };

        let prefix = granularity.id_prefix();
        let mut chunks = spans
            .into_iter()
            .filter(|span| !span.is_empty())
            .enumerate()
            .map(|(idx, span)| {
                let id = match granularity {
                    Granularity::Lines => format!("{prefix}{}", idx + 1),
                    _ => format!(
                        "{prefix}{}-{}",
                        idx + 1,
                        short_hash(span, CHUNK_HASH_CHARS)
                    ),
                };
                Chunk::new(id, span)
            })
            .collect::<Vec<_>>();

        apply_preserve(&mut chunks, &self.selectors);
        chunks
    }
}

/// Chunks without caller selectors; explicit keep markers still apply.
pub fn chunk_document(document: &str, granularity: Granularity) -> Vec<Chunk> {
    Chunker::default().chunk(document, granularity)
}
