//! Relevance heuristics shared by the search providers.

use chrono::{DateTime, Utc};

/// Coarse file category driving the local type-priority weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Application,
    Document,
    Media,
    Folder,
    Office,
    Archive,
    Other,
}

impl FileCategory {
    pub fn weight(self) -> f64 {
        match self {
            FileCategory::Application => 1.0,
            FileCategory::Document => 0.95,
            FileCategory::Media => 0.9,
            FileCategory::Folder => 0.9,
            FileCategory::Office => 0.88,
            FileCategory::Archive => 0.8,
            FileCategory::Other => 0.75,
        }
    }
}

/// What a scorer gets to look at.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub name: &'a str,
    pub category: FileCategory,
    pub modified: Option<DateTime<Utc>>,
}

/// Maps a query and candidate to a relevance score in `0..=100`.
pub trait Scorer: Send + Sync {
    fn score(&self, query: &str, candidate: &Candidate<'_>, now: DateTime<Utc>) -> f64;
}

fn age_in_days(modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<f64> {
    modified.map(|m| (now - m).num_seconds().max(0) as f64 / 86_400.0)
}

fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

/// Local files: name tier × type weight × recency multiplier.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalScorer;

impl LocalScorer {
    fn name_tier(query: &str, name: &str) -> f64 {
        let stem = stem(name);
        if name == query || stem == query {
            return 100.0;
        }
        if stem.ends_with(query) {
            return 90.0;
        }
        if name.starts_with(query) {
            return 85.0;
        }
        if name.contains(query) {
            return 75.0;
        }
        let query_words: Vec<&str> = query.split_whitespace().collect();
        if query_words.is_empty() {
            return 10.0;
        }
        let matched = query_words.iter().filter(|w| name.contains(*w)).count();
        if matched > 0 {
            40.0 + 40.0 * matched as f64 / query_words.len() as f64
        } else {
            10.0
        }
    }

    fn recency_multiplier(modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        match age_in_days(modified, now) {
            Some(d) if d < 1.0 => 1.15,
            Some(d) if d < 7.0 => 1.10,
            Some(d) if d < 30.0 => 1.05,
            _ => 1.0,
        }
    }
}

impl Scorer for LocalScorer {
    fn score(&self, query: &str, candidate: &Candidate<'_>, now: DateTime<Utc>) -> f64 {
        let query = query.trim().to_lowercase();
        let name = candidate.name.to_lowercase();
        let score = Self::name_tier(&query, &name)
            * candidate.category.weight()
            * Self::recency_multiplier(candidate.modified, now);
        score.clamp(0.0, 100.0)
    }
}

/// Cloud files: exact > prefix > substring > per-word fuzzy, plus a recency boost.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudScorer;

impl CloudScorer {
    fn name_tier(query: &str, name: &str) -> f64 {
        if name == query || stem(name) == query {
            return 100.0;
        }
        if name.starts_with(query) {
            return 90.0;
        }
        if name.contains(query) {
            return 70.0;
        }
        let query_words: Vec<&str> = query.split_whitespace().collect();
        if query_words.is_empty() {
            return 20.0;
        }
        let total: f64 = query_words
            .iter()
            .map(|qw| {
                words(name)
                    .map(|nw| fuzzy_similarity(qw, nw))
                    .fold(fuzzy_similarity(qw, name), f64::max)
            })
            .sum();
        20.0 + 40.0 * total / query_words.len() as f64
    }

    fn recency_boost(modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        match age_in_days(modified, now) {
            Some(d) if d < 1.0 => 10.0,
            Some(d) if d < 7.0 => 5.0,
            _ => 0.0,
        }
    }
}

impl Scorer for CloudScorer {
    fn score(&self, query: &str, candidate: &Candidate<'_>, now: DateTime<Utc>) -> f64 {
        let query = query.trim().to_lowercase();
        let name = candidate.name.to_lowercase();
        let score = Self::name_tier(&query, &name) + Self::recency_boost(candidate.modified, now);
        score.clamp(0.0, 100.0)
    }
}

/// Subsequence similarity in `0..=1`: every query char found in order scores
/// one point, plus one when it directly follows the previous match and one
/// when it starts a word in `target`.
pub fn fuzzy_similarity(query: &str, target: &str) -> f64 {
    let query: Vec<char> = query.chars().collect();
    if query.is_empty() {
        return 0.0;
    }
    let target: Vec<char> = target.chars().collect();

    let mut points = 0.0;
    let mut qi = 0;
    let mut last_match: Option<usize> = None;
    for (ti, &tc) in target.iter().enumerate() {
        if qi == query.len() {
            break;
        }
        if tc != query[qi] {
            continue;
        }
        points += 1.0;
        if last_match.is_some_and(|last| last + 1 == ti) {
            points += 1.0;
        }
        if ti == 0 || !target[ti - 1].is_alphanumeric() {
            points += 1.0;
        }
        last_match = Some(ti);
        qi += 1;
    }
    if qi < query.len() {
        return 0.0;
    }
    (points / (2.0 * query.len() as f64)).min(1.0)
}

/// Parse an RFC 3339 timestamp as stored for Drive files.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
