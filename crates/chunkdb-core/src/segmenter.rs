//! Sentence segmentation.
//!
//! Boundaries are runs of `.`, `!` or `?` (optionally followed by closing
//! quotes or brackets) that are followed by whitespace. Two guards keep
//! common false positives together:
//! - decimals such as `3.14` never split, because a boundary needs trailing
//!   whitespace
//! - a single `.` after a word from the abbreviation list (`Dr.`, `e.g.`)
//!   does not end the sentence
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]+["'\)\]]*\s+"#).expect("valid sentence boundary pattern"));

/// Abbreviations that do not terminate a sentence, compared case-insensitively
/// without their trailing period.
pub const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "e.g", "i.e", "inc", "ltd", "corp", "fig", "approx",
];

/// One sentence and its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Sentence {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    abbreviations: HashSet<String>,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_ABBREVIATIONS.iter().copied())
    }
}

impl SentenceSegmenter {
    pub fn new<I, S>(abbreviations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let abbreviations = abbreviations
            .into_iter()
            .map(|a| a.as_ref().trim().trim_end_matches('.').to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        Self { abbreviations }
    }

    /// Split `text` into trimmed, non-empty sentences in source order.
    /// Whitespace-only input yields no sentences.
    pub fn segment(&self, text: &str) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        let mut seg_start = 0usize;

        for mat in BOUNDARY.find_iter(text) {
            let terminator = mat.as_str().trim_end();
            if self.is_abbreviation(&text[seg_start..mat.start()], terminator) {
                continue;
            }
            let punct_end = mat.start() + terminator.len();
            push_trimmed(&mut sentences, text, seg_start, punct_end);
            seg_start = mat.end();
        }
        push_trimmed(&mut sentences, text, seg_start, text.len());
        sentences
    }

    fn is_abbreviation(&self, before: &str, terminator: &str) -> bool {
        if terminator != "." {
            return false;
        }
        let word = before
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or("")
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        !word.is_empty() && self.abbreviations.contains(&word)
    }
}

fn push_trimmed(out: &mut Vec<Sentence>, text: &str, start: usize, end: usize) {
    if start >= end {
        return;
    }
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = raw.len() - raw.trim_start().len();
    let start = start + lead;
    out.push(Sentence { text: trimmed.to_string(), start, end: start + trimmed.len() });
}
