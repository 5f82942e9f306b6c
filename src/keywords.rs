//! Salient-term extraction.
//!
//! Turns the plain text of a document into a ranked list of at most
//! [`MAX_KEYWORDS`] distinct terms: single words, adjacent-word phrases,
//! hyphenated compounds, long numbers and acronyms. The result is attached to
//! the document record and indexed as exact terms.
//!
//! Extraction is a pure function of its input, so it can run on any thread
//! and always produces the same list for the same text.

use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;
use tantivy::tokenizer::{
    AsciiFoldingFilter,
    LowerCaser,
    RawTokenizer,
    TextAnalyzer,
    TokenStream,
};

use crate::stopwords::is_stopword;

/// Maximum number of keywords returned for a document.
pub const MAX_KEYWORDS: usize = 50;

const MAX_SINGLE_WORDS: usize = 30;
const MAX_PHRASES: usize = 20;

const MIN_TOKEN_CHARS: usize = 4;
const MIN_BIGRAM_CHARS: usize = 8;
const MIN_TRIGRAM_CHARS: usize = 12;
const MIN_COMPOUND_CHARS: usize = 6;
const MIN_NUMBER_DIGITS: usize = 4;

/// A term whose frequency is above this share of all surviving tokens is
/// considered common and penalized.
const COMMON_TERM_RATIO: f64 = 0.10;

static UPPERCASE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\p{Lu}{2,}\b").expect("uppercase run pattern is valid")
});

static HYPHENATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{N}]+(?:-[\p{L}\p{N}]+)+$")
        .expect("hyphenated compound pattern is valid")
});

/// A candidate term with its occurrence count and final score.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScoredTerm {
    pub term: String,
    pub frequency: usize,
    pub score: f64,
}

impl ScoredTerm {
    fn word_count(&self) -> usize {
        self.term.split(' ').count()
    }
}

/// Extract the ranked keyword list for `text`.
///
/// Empty or stopword-only text yields an empty list.
pub fn extract_keywords(text: &str) -> Vec<String> {
    diversify(score_terms(text))
}

/// Score every candidate term in `text`, highest score first.
///
/// Ties keep the order in which candidates were generated. The list is not
/// truncated; [`extract_keywords`] applies the final limits.
pub fn score_terms(text: &str) -> Vec<ScoredTerm> {
    let normalized = normalize(text);
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let survivors: Vec<&str> =
        tokens.iter().copied().filter(|t| is_significant(t)).collect();

    let candidates = collect_candidates(text, &tokens, &survivors);
    if candidates.is_empty() {
        return Vec::new();
    }

    let counts = count_occurrences(&tokens, &candidates);
    let common_threshold = survivors.len() as f64 * COMMON_TERM_RATIO;

    let mut scored: Vec<ScoredTerm> = candidates
        .into_iter()
        .filter_map(|term| {
            let frequency = counts.get(term.as_str()).copied().unwrap_or(0);
            if frequency == 0 {
                return None;
            }
            let score = score(&term, frequency, common_threshold);
            Some(ScoredTerm {
                term,
                frequency,
                score,
            })
        })
        .collect();

    // `sort_by` is stable, so equal scores keep candidate order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Lowercase, strip diacritics, replace everything except letters, digits,
/// whitespace and hyphens with a space, and collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let folded = fold(text);
    let cleaned: String = folded
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and ASCII-fold the whole input as a single token.
fn fold(text: &str) -> String {
    let mut analyzer = TextAnalyzer::builder(RawTokenizer::default())
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .build();
    let mut stream = analyzer.token_stream(text);
    let mut out = String::with_capacity(text.len());
    while stream.advance() {
        out.push_str(&stream.token().text);
    }
    out
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn is_significant(token: &str) -> bool {
    char_len(token) >= MIN_TOKEN_CHARS
        && token.chars().any(char::is_alphanumeric)
        && !is_numeric(token)
        && !is_stopword(token)
}

/// Years (1900-2099) and any other run of at least four digits.
fn is_contextual_number(token: &str) -> bool {
    is_numeric(token) && token.len() >= MIN_NUMBER_DIGITS
}

/// Distinct candidate terms in generation order.
#[derive(Default)]
struct Candidates {
    terms: Vec<String>,
    seen: HashSet<String>,
}

impl Candidates {
    fn push(&mut self, term: String) {
        if !self.seen.contains(&term) {
            self.seen.insert(term.clone());
            self.terms.push(term);
        }
    }
}

fn collect_candidates(
    original: &str,
    tokens: &[&str],
    survivors: &[&str],
) -> Vec<String> {
    let mut candidates = Candidates::default();

    for word in survivors {
        candidates.push((*word).to_string());
    }

    for pair in survivors.windows(2) {
        let phrase = pair.join(" ");
        if char_len(&phrase) >= MIN_BIGRAM_CHARS {
            candidates.push(phrase);
        }
    }

    for triple in survivors.windows(3) {
        let phrase = triple.join(" ");
        if char_len(&phrase) >= MIN_TRIGRAM_CHARS {
            candidates.push(phrase);
        }
    }

    for token in tokens {
        if char_len(token) >= MIN_COMPOUND_CHARS && HYPHENATED.is_match(token)
        {
            candidates.push((*token).to_string());
        }
    }

    for token in tokens {
        if is_contextual_number(token) {
            candidates.push((*token).to_string());
        }
    }

    for run in UPPERCASE_RUN.find_iter(original) {
        let folded = normalize(run.as_str());
        if !folded.is_empty() && !is_stopword(&folded) {
            candidates.push(folded);
        }
    }

    candidates.terms
}

/// Count whole-word occurrences of each candidate in the token stream.
///
/// A candidate of `n` words matches every window of `n` consecutive tokens
/// that spells it exactly.
fn count_occurrences(
    tokens: &[&str],
    candidates: &[String],
) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> =
        candidates.iter().map(|c| (c.clone(), 0)).collect();
    let max_words = candidates
        .iter()
        .map(|c| c.split(' ').count())
        .max()
        .unwrap_or(1);

    for n in 1..=max_words.min(tokens.len()) {
        for window in tokens.windows(n) {
            if let Some(count) = counts.get_mut(window.join(" ").as_str()) {
                *count += 1;
            }
        }
    }
    counts
}

fn score(term: &str, frequency: usize, common_threshold: f64) -> f64 {
    let len = char_len(term);
    let length_bonus = if len >= 12 {
        2.0
    } else if len >= 8 {
        1.5
    } else {
        1.0
    };

    let ngram_bonus = match term.split(' ').count() {
        3 => 1.8,
        2 => 1.3,
        _ => 1.0,
    };

    let hyphen_bonus = if term.contains('-') { 1.4 } else { 1.0 };
    let numeric_bonus = if term.chars().any(|c| c.is_ascii_digit()) {
        1.2
    } else {
        1.0
    };
    let common_penalty = if frequency as f64 > common_threshold {
        0.7
    } else {
        1.0
    };

    frequency as f64
        * length_bonus
        * ngram_bonus
        * hyphen_bonus
        * numeric_bonus
        * common_penalty
}

/// Keep the top-ranked terms, at most 30 single words followed by at most 20
/// phrases.
fn diversify(scored: Vec<ScoredTerm>) -> Vec<String> {
    let top = scored.into_iter().take(MAX_KEYWORDS);
    let (singles, phrases): (Vec<ScoredTerm>, Vec<ScoredTerm>) =
        top.partition(|t| t.word_count() == 1);

    singles
        .into_iter()
        .take(MAX_SINGLE_WORDS)
        .chain(phrases.into_iter().take(MAX_PHRASES))
        .take(MAX_KEYWORDS)
        .map(|t| t.term)
        .collect()
}
