//! Semantic form-field matching used by `smart_fill` steps.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use wayline_common::FieldCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSemantic {
    Email,
    Password,
    Name,
    Departure,
    Destination,
    Date,
    Phone,
    Address,
    Unknown,
}

impl FieldSemantic {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldSemantic::Email => "email",
            FieldSemantic::Password => "password",
            FieldSemantic::Name => "name",
            FieldSemantic::Departure => "departure",
            FieldSemantic::Destination => "destination",
            FieldSemantic::Date => "date",
            FieldSemantic::Phone => "phone",
            FieldSemantic::Address => "address",
            FieldSemantic::Unknown => "unknown",
        }
    }
}

lazy_static! {
    // Checked in order; the first match wins.
    static ref SEMANTIC_PATTERNS: Vec<(FieldSemantic, Regex)> = vec![
        (FieldSemantic::Email, Regex::new(r"(?i)e-?mail").unwrap()),
        (FieldSemantic::Password, Regex::new(r"(?i)password|\bpass\b|\bpwd\b").unwrap()),
        (FieldSemantic::Departure, Regex::new(r"(?i)\bfrom\b|departure|origin|\bdepart").unwrap()),
        (FieldSemantic::Destination, Regex::new(r"(?i)\bto\b|destination|arrival|\barrive|going to|where to").unwrap()),
        (FieldSemantic::Date, Regex::new(r"(?i)date|\bwhen\b|check-?in|check-?out").unwrap()),
        (FieldSemantic::Phone, Regex::new(r"(?i)phone|\btel\b|mobile").unwrap()),
        (FieldSemantic::Address, Regex::new(r"(?i)address|street|\bcity\b|postcode|zip").unwrap()),
        (FieldSemantic::Name, Regex::new(r"(?i)name").unwrap()),
    ];
}

pub fn infer_semantic(field: &FieldCandidate) -> FieldSemantic {
    match field.input_type.as_str() {
        "email" => return FieldSemantic::Email,
        "password" => return FieldSemantic::Password,
        "tel" => return FieldSemantic::Phone,
        "date" => return FieldSemantic::Date,
        _ => {}
    }
    let haystack = [
        field.name.as_str(),
        field.id.as_str(),
        field.placeholder.as_str(),
        field.label.as_str(),
        field.nearby_text.as_str(),
    ]
    .join(" ");
    SEMANTIC_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&haystack))
        .map(|(semantic, _)| *semantic)
        .unwrap_or(FieldSemantic::Unknown)
}

/// Base 50, +20 for a label, +15 for a placeholder, +15 for a known purpose.
pub fn score(field: &FieldCandidate, semantic: FieldSemantic) -> u32 {
    let mut score = 50;
    if !field.label.trim().is_empty() {
        score += 20;
    }
    if !field.placeholder.trim().is_empty() {
        score += 15;
    }
    if semantic != FieldSemantic::Unknown {
        score += 15;
    }
    score.min(100)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredField {
    pub candidate: FieldCandidate,
    pub semantic: FieldSemantic,
    pub score: u32,
}

pub fn rank(candidates: &[FieldCandidate]) -> Vec<ScoredField> {
    let mut scored: Vec<ScoredField> = candidates
        .iter()
        .map(|c| {
            let semantic = infer_semantic(c);
            ScoredField {
                candidate: c.clone(),
                semantic,
                score: score(c, semantic),
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored
}

/// How well a data key fits a field, in `[0, 1]`.
pub fn mapping_confidence(key: &str, field: &ScoredField) -> f32 {
    let key = key.to_lowercase();
    let semantic = field.semantic.as_str();
    let mut confidence = field.score as f32 / 100.0;
    if key == semantic {
        confidence += 0.5;
    } else if semantic.contains(&key) {
        confidence += 0.3;
    }
    let context = format!(
        "{} {} {}",
        field.candidate.label, field.candidate.nearby_text, field.candidate.placeholder
    )
    .to_lowercase();
    if context.contains(&key) {
        confidence += 0.2;
    }
    confidence.min(1.0)
}

/// Up to three fields whose mapping confidence for `key` exceeds 0.3, best first.
pub fn suggestions<'a>(key: &str, ranked: &'a [ScoredField]) -> Vec<(&'a ScoredField, f32)> {
    let mut out: Vec<(&ScoredField, f32)> = ranked
        .iter()
        .map(|f| (f, mapping_confidence(key, f)))
        .filter(|(_, c)| *c > 0.3)
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1));
    out.truncate(3);
    out
}

/// Picks a field for each key: the best-scoring field of the exact semantic,
/// else of a semantic containing the key. A field is used at most once.
pub fn assign(
    values: &BTreeMap<String, String>,
    ranked: &[ScoredField],
) -> Vec<(String, String, Option<ScoredField>)> {
    let mut used = HashSet::new();
    let mut out = Vec::new();
    for (key, value) in values {
        let wanted = key.to_lowercase();
        let free = |f: &&ScoredField| !used.contains(&f.candidate.selector);
        let exact = ranked
            .iter()
            .filter(free)
            .find(|f| f.semantic.as_str() == wanted);
        let chosen = exact.or_else(|| {
            ranked
                .iter()
                .filter(free)
                .find(|f| f.semantic != FieldSemantic::Unknown && f.semantic.as_str().contains(&wanted))
        });
        if let Some(field) = chosen {
            used.insert(field.candidate.selector.clone());
        }
        out.push((key.clone(), value.clone(), chosen.cloned()));
    }
    out
}
