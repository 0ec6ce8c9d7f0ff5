//! Adaptive document chunking.
//!
//! Splits long text into titled, size-balanced chunks. Units are paragraphs
//! (blank-line separated) unless the text has too few paragraphs to reach
//! the target chunk count, in which case it is resplit into sentences.
//! Units are accumulated into chunks until a heading, the size ceiling or
//! the per-chunk optimum closes the current one, and a final pass merges
//! undersized chunks forward.

pub mod heading;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ChunkerConfig;
use crate::error::Result;
pub use heading::{HeadingDetector, HeadingMatch, HeadingMatcher};

/// Longest excerpt stored in a chunk summary.
pub const EXCERPT_CHARS: usize = 200;

/// Sentence fragments this short are folded into a neighbour.
const MIN_SENTENCE_CHARS: usize = 20;

/// Units longer than this can close a chunk that is past its optimum.
const SUBSTANTIAL_UNIT_CHARS: usize = 100;

const FIRST_TITLE: &str = "Introduction";

/// A titled segment of a document.
///
/// `start_position..end_position` is the byte span of the chunk in the
/// original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub title: String,
    pub content: String,
    pub start_position: usize,
    pub end_position: usize,
}

impl Chunk {
    pub fn word_count(&self) -> usize {
        word_count(&self.content)
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            title: self.title.clone(),
            excerpt: excerpt(first_sentence(&self.content), EXCERPT_CHARS),
            word_count: self.word_count(),
            start_position: self.start_position,
            end_position: self.end_position,
        }
    }
}

/// Display-sized description of a chunk, stored on documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub title: String,
    pub excerpt: String,
    pub word_count: usize,
    pub start_position: usize,
    pub end_position: usize,
}

pub fn summarize(chunks: &[Chunk]) -> Vec<ChunkSummary> {
    chunks.iter().map(Chunk::summary).collect()
}

/// How the text was cut into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    Paragraph,
    Sentence,
}

impl UnitMode {
    fn separator(self) -> &'static str {
        match self {
            UnitMode::Paragraph => "\n\n",
            UnitMode::Sentence => " ",
        }
    }
}

impl std::fmt::Display for UnitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitMode::Paragraph => write!(f, "paragraph"),
            UnitMode::Sentence => write!(f, "sentence"),
        }
    }
}

/// Byte span of one unit, already trimmed.
type Span = (usize, usize);

/// Chunk sizes derived from the document length.
#[derive(Debug, Clone, Copy)]
struct Plan {
    target_chunks: usize,
    optimal_size: usize,
}

impl Plan {
    fn new(total_words: usize, target: usize) -> Self {
        let target_chunks = total_words.div_ceil(target).max(1);
        Self {
            target_chunks,
            optimal_size: total_words.div_ceil(target_chunks),
        }
    }
}

/// Walk state threaded through every unit.
#[derive(Debug)]
struct ChunkState {
    chunks: Vec<Chunk>,
    title: String,
    units: Vec<Span>,
    words: usize,
}

impl ChunkState {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            title: FIRST_TITLE.to_string(),
            units: Vec::new(),
            words: 0,
        }
    }

    fn flush(&mut self, text: &str, separator: &str) {
        let (Some(&(start, _)), Some(&(_, end))) = (self.units.first(), self.units.last())
        else {
            return;
        };
        let content = self
            .units
            .iter()
            .map(|&(s, e)| &text[s..e])
            .collect::<Vec<_>>()
            .join(separator);
        self.chunks.push(Chunk {
            title: self.title.clone(),
            content,
            start_position: start,
            end_position: end,
        });
        self.units.clear();
        self.words = 0;
    }

    fn finish(mut self, text: &str, separator: &str) -> Vec<Chunk> {
        self.flush(text, separator);
        self.chunks
    }
}

/// Splits documents into chunks using a validated [`ChunkerConfig`].
#[derive(Debug)]
pub struct Chunker {
    config: ChunkerConfig,
    headings: HeadingDetector,
    paragraph_break: Regex,
    sentence_end: Regex,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            headings: HeadingDetector::new()?,
            paragraph_break: Regex::new(r"\n[ \t\r]*\n\s*")?,
            sentence_end: Regex::new(r"[.!?]+\s+")?,
        })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks. `name` is only used for logging.
    pub fn chunk(&self, text: &str, name: Option<&str>) -> Vec<Chunk> {
        let total_words = word_count(text);
        if total_words == 0 {
            return Vec::new();
        }

        let plan = Plan::new(total_words, self.config.target_chunk_size);
        let (mode, units) = self.units(text, plan);
        tracing::debug!(
            name = name.unwrap_or("<unnamed>"),
            words = total_words,
            target_chunks = plan.target_chunks,
            optimal_size = plan.optimal_size,
            units = units.len(),
            %mode,
            "chunking document"
        );

        let separator = mode.separator();
        let chunks = units
            .into_iter()
            .fold(ChunkState::new(), |state, span| {
                self.step(state, text, span, plan, separator)
            })
            .finish(text, separator);
        self.merge_small(chunks)
    }

    fn units(&self, text: &str, plan: Plan) -> (UnitMode, Vec<Span>) {
        let paragraphs = self.paragraphs(text);
        if paragraphs.len() * 2 < plan.target_chunks {
            (UnitMode::Sentence, self.sentences(text))
        } else {
            (UnitMode::Paragraph, paragraphs)
        }
    }

    fn paragraphs(&self, text: &str) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut start = 0;
        for brk in self.paragraph_break.find_iter(text) {
            spans.extend(trim_span(text, start, brk.start()));
            start = brk.end();
        }
        spans.extend(trim_span(text, start, text.len()));
        spans
    }

    fn sentences(&self, text: &str) -> Vec<Span> {
        let mut raw = Vec::new();
        let mut start = 0;
        for end in self.sentence_end.find_iter(text) {
            let punct_end = end.start() + end.as_str().trim_end().len();
            raw.extend(trim_span(text, start, punct_end));
            start = end.end();
        }
        raw.extend(trim_span(text, start, text.len()));
        fold_fragments(text, raw)
    }

    fn step(
        &self,
        mut state: ChunkState,
        text: &str,
        span: Span,
        plan: Plan,
        separator: &str,
    ) -> ChunkState {
        let unit = &text[span.0..span.1];
        let unit_words = word_count(unit);
        let heading = match self.headings.detect(unit) {
            HeadingMatch::Heading { text } => Some(text),
            HeadingMatch::NotHeading => None,
        };

        if state.units.is_empty() {
            if let Some(title) = heading {
                state.title = title;
            }
        } else {
            let close = (heading.is_some() && state.words > self.config.min_chunk_size)
                || state.words + unit_words > self.config.max_chunk_size
                || (state.words > plan.optimal_size
                    && unit.chars().count() > SUBSTANTIAL_UNIT_CHARS);

            // A heading that does not close the chunk stays inside it as
            // body text and titles nothing.
            if close {
                state.flush(text, separator);
                state.title =
                    heading.unwrap_or_else(|| format!("Section {}", state.chunks.len() + 1));
            }
        }

        state.units.push(span);
        state.words += unit_words;
        state
    }

    fn merge_small(&self, mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut i = 0;
        while i + 1 < chunks.len() {
            let words = chunks[i].word_count();
            let combined = words + chunks[i + 1].word_count();
            if words < self.config.min_chunk_size && combined <= self.config.max_chunk_size {
                let next = chunks.remove(i + 1);
                let current = &mut chunks[i];
                current.content.push_str("\n\n");
                current.content.push_str(&next.content);
                current.end_position = next.end_position;
            } else {
                i += 1;
            }
        }
        chunks
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Text up to and including the first sentence terminator followed by
/// whitespace, or the whole text.
fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            match chars.peek() {
                Some(&(_, next)) if next.is_whitespace() => return &text[..idx + ch.len_utf8()],
                None => return text,
                _ => {}
            }
        }
    }
    text
}

fn trim_span(text: &str, start: usize, end: usize) -> Option<Span> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lead = slice.len() - slice.trim_start().len();
    Some((start + lead, start + lead + trimmed.len()))
}

/// Widen short sentence fragments into the following span, or the
/// preceding one when nothing follows.
fn fold_fragments(text: &str, raw: Vec<Span>) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::with_capacity(raw.len());
    let mut carry: Option<usize> = None;
    for (start, end) in raw {
        let start = carry.take().unwrap_or(start);
        if text[start..end].chars().count() <= MIN_SENTENCE_CHARS {
            carry = Some(start);
        } else {
            spans.push((start, end));
        }
    }
    if let Some(start) = carry {
        match spans.last_mut() {
            Some(last) => last.1 = text[start..].trim_end().len() + start,
            None => spans.extend(trim_span(text, start, text.len())),
        }
    }
    spans
}

#[cfg(test)]
#[path = "chunker_tests.rs"]
mod tests;
