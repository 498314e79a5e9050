use super::{IntentClassifier, ServiceError};
use crate::planner::route::looks_like_flight_search;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use wayline_common::{
    AutomationIntent, Classification, CommandParameters, Complexity, IntentKind,
};

lazy_static! {
    static ref URL: Regex = Regex::new(r#"https?://[^\s"'<>]+"#).unwrap();
    static ref BARE_DOMAIN: Regex =
        Regex::new(r"(?i)\b(?:www\.)?[a-z0-9-]+\.(?:com|org|net|io|dev|co\.uk|co\.in|in|gov|edu)\b(?:/[^\s]*)?")
            .unwrap();
    static ref FORM_FIELD: Regex = Regex::new(r#"\b([A-Za-z_][\w-]*)\s*[:=]\s*("[^"]*"|'[^']*'|\S+)"#).unwrap();

    static ref FORM_WORDS: Regex =
        Regex::new(r"(?i)\b(fill( in| out)?|form|submit|sign ?up|register|log ?in)\b").unwrap();
    static ref EXTRACT_WORDS: Regex =
        Regex::new(r"(?i)\b(extract|scrape|collect|tables?|download data|pull data|get (all )?the data)\b").unwrap();
    static ref MONITOR_WORDS: Regex =
        Regex::new(r"(?i)\b(monitor|watch|track|keep an eye|alert me|notify me)\b").unwrap();
    static ref RESEARCH_WORDS: Regex =
        Regex::new(r"(?i)\b(research|investigate|compare|find out|learn about|summari[sz]e)\b").unwrap();
    static ref NAVIGATE_WORDS: Regex =
        Regex::new(r"(?i)^\s*(go to|open|navigate to|visit|load)\b").unwrap();
    static ref SEARCH_PREFIX: Regex =
        Regex::new(r"(?i)^\s*(please\s+)?(search( the web)? for|search|find( me)?|look up|look for|google)\s+").unwrap();

    static ref TARGET_WORDS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\btables?\b").unwrap(), "table"),
        (Regex::new(r"(?i)\blinks?\b").unwrap(), "links"),
        (Regex::new(r"(?i)\b(images?|pictures?|photos?)\b").unwrap(), "images"),
        (Regex::new(r"(?i)\b(headings?|headlines?|titles?)\b").unwrap(), "headings"),
        (Regex::new(r"(?i)\b(prices?|costs?|fares?)\b").unwrap(), "prices"),
        (Regex::new(r"(?i)\blists?\b").unwrap(), "lists"),
    ];
}

/// Keyword-based classifier used when no classification service is configured.
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, command: &str) -> Classification {
        let text = command.trim();
        let urls = find_urls(text);
        let form_data = find_form_data(text);

        let kind = if looks_like_flight_search(text) {
            IntentKind::Search
        } else if FORM_WORDS.is_match(text) || !form_data.is_empty() {
            IntentKind::FormFill
        } else if EXTRACT_WORDS.is_match(text) {
            IntentKind::DataExtract
        } else if MONITOR_WORDS.is_match(text) {
            IntentKind::Monitor
        } else if RESEARCH_WORDS.is_match(text) {
            IntentKind::Research
        } else if NAVIGATE_WORDS.is_match(text) && !urls.is_empty() {
            IntentKind::Navigate
        } else {
            IntentKind::Search
        };

        let complexity = match kind {
            IntentKind::Research => Complexity::Complex,
            _ if urls.len() > 1 || text.split_whitespace().count() > 15 => Complexity::Medium,
            _ => Complexity::Simple,
        };

        let extraction_targets: Vec<String> = TARGET_WORDS
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, t)| t.to_string())
            .collect();

        let search_terms = match kind {
            IntentKind::Search | IntentKind::Research => {
                let stripped = SEARCH_PREFIX.replace(text, "");
                let stripped = URL.replace_all(&stripped, "");
                let term = stripped.trim();
                if term.is_empty() {
                    Vec::new()
                } else {
                    vec![term.to_string()]
                }
            }
            _ => Vec::new(),
        };

        let confidence = if kind == IntentKind::Search && search_terms.is_empty() {
            0.3
        } else {
            0.6
        };

        Classification {
            intent: AutomationIntent::new(kind, text).with_complexity(complexity),
            parameters: CommandParameters {
                urls,
                search_terms,
                extraction_targets,
                form_data,
                filters: Vec::new(),
            },
            suggested_actions: None,
            confidence,
        }
    }
}

#[async_trait]
impl IntentClassifier for RuleClassifier {
    async fn classify(&self, command: &str) -> Result<Classification, ServiceError> {
        Ok(self.classify_text(command))
    }
}

fn find_urls(text: &str) -> Vec<String> {
    let mut urls: Vec<String> = URL
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
        .collect();
    if urls.is_empty() {
        urls = BARE_DOMAIN
            .find_iter(text)
            .map(|m| format!("https://{}", m.as_str().trim_end_matches(['.', ',', ')'])))
            .collect();
    }
    urls
}

fn find_form_data(text: &str) -> BTreeMap<String, String> {
    let without_urls = URL.replace_all(text, "");
    FORM_FIELD
        .captures_iter(&without_urls)
        .map(|caps| {
            let value = caps[2].trim_matches(|c| c == '"' || c == '\'').to_string();
            (caps[1].to_string(), value)
        })
        .collect()
}
