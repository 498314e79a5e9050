//! Flight-route detection.
//!
//! [`classify_route`] is the single place that decides whether free text is a
//! flight search and which airports it names.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref FLIGHT_KEYWORDS: Regex = Regex::new(
        r"(?i)\b(flights?|airfares?|air\s+fares?|airlines?|plane\s+tickets?|fly|flying|one[- ]way|round[- ]trip|return\s+trip)\b|travel/flights|/flights?/"
    )
    .unwrap();
    static ref CODE_PAIR: Regex =
        Regex::new(r"\b([A-Z]{3})\s*(?:to|-|–|→|>)\s*([A-Z]{3})\b").unwrap();
    static ref X_TO_Y: Regex = Regex::new(
        r"(?i)\b([a-z]{3,}(?:\s+[a-z]+){0,2})\s+to\s+([a-z]{3,}(?:\s+[a-z]+){0,2})"
    )
    .unwrap();
    static ref X_DASH_Y: Regex =
        Regex::new(r"\b([A-Za-z]{3,})\s*[-–]\s*([A-Za-z]{3,})\b").unwrap();

    static ref CITY_CODES: HashMap<&'static str, &'static str> = [
        ("london", "LHR"),
        ("heathrow", "LHR"),
        ("gatwick", "LGW"),
        ("stansted", "STN"),
        ("luton", "LTN"),
        ("manchester", "MAN"),
        ("birmingham", "BHX"),
        ("edinburgh", "EDI"),
        ("glasgow", "GLA"),
        ("bristol", "BRS"),
        ("mumbai", "BOM"),
        ("bombay", "BOM"),
        ("delhi", "DEL"),
        ("new delhi", "DEL"),
        ("bangalore", "BLR"),
        ("bengaluru", "BLR"),
        ("chennai", "MAA"),
        ("madras", "MAA"),
        ("kolkata", "CCU"),
        ("calcutta", "CCU"),
        ("hyderabad", "HYD"),
        ("goa", "GOI"),
        ("kochi", "COK"),
        ("cochin", "COK"),
        ("ahmedabad", "AMD"),
        ("pune", "PNQ"),
        ("new york", "JFK"),
        ("paris", "CDG"),
        ("dubai", "DXB"),
        ("singapore", "SIN"),
        ("tokyo", "HND"),
        ("los angeles", "LAX"),
        ("frankfurt", "FRA"),
        ("amsterdam", "AMS"),
    ]
    .into_iter()
    .collect();
}

const UK_AIRPORTS: &[&str] = &[
    "LHR", "LGW", "STN", "LTN", "LCY", "MAN", "BHX", "EDI", "GLA", "BRS",
];
const INDIA_AIRPORTS: &[&str] = &[
    "BOM", "DEL", "BLR", "MAA", "CCU", "HYD", "GOI", "COK", "AMD", "PNQ",
];

/// Words that can sit next to a place name in a sentence but are never part of it.
const FILLER: &[&str] = &[
    "from", "flights", "flight", "fly", "cheap", "cheapest", "search", "for", "find", "book",
    "the", "a", "on", "in", "between", "and", "return", "one", "way",
];

/// A flight search recognised in free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteIntent {
    /// Airport code when known, otherwise the place name as written.
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub query: String,
}

impl RouteIntent {
    pub fn has_codes(&self) -> bool {
        let is_code = |s: &Option<String>| {
            s.as_deref()
                .is_some_and(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_uppercase()))
        };
        is_code(&self.origin) && is_code(&self.destination)
    }

    pub fn is_uk_to_india(&self) -> bool {
        matches!(
            (self.origin.as_deref(), self.destination.as_deref()),
            (Some(o), Some(d)) if UK_AIRPORTS.contains(&o) && INDIA_AIRPORTS.contains(&d)
        )
    }

    /// Short phrase usable as a search query.
    pub fn search_phrase(&self) -> String {
        match (&self.origin, &self.destination) {
            (Some(o), Some(d)) => format!("Flights from {} to {}", o, d),
            _ => self.query.clone(),
        }
    }
}

impl fmt::Display for RouteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.origin.as_deref().unwrap_or("?"),
            self.destination.as_deref().unwrap_or("?")
        )
    }
}

fn encode(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.trim().as_bytes()).collect()
}

pub fn web_search_url(query: &str) -> String {
    format!("https://www.google.com/search?q={}", encode(query))
}

pub fn flight_search_url(query: &str) -> String {
    format!("https://www.google.com/travel/flights?q={}", encode(query))
}

/// Destination for a navigate that only carries free text.
pub fn synthesize_url(text: &str) -> String {
    if looks_like_flight_search(text) {
        flight_search_url(text)
    } else {
        web_search_url(text)
    }
}

pub fn looks_like_flight_search(text: &str) -> bool {
    FLIGHT_KEYWORDS.is_match(text)
}

/// Returns a route when `text` reads like a flight search.
pub fn classify_route(text: &str) -> Option<RouteIntent> {
    if !looks_like_flight_search(text) {
        return None;
    }
    let (origin, destination) = match extract_places(text) {
        Some((o, d)) => (Some(o), Some(d)),
        None => (None, None),
    };
    Some(RouteIntent {
        origin,
        destination,
        query: text.trim().to_string(),
    })
}

/// Ordered attempts: code pair, then "X to Y", then "X-Y".
fn extract_places(text: &str) -> Option<(String, String)> {
    if let Some(caps) = CODE_PAIR.captures(text) {
        return Some((caps[1].to_string(), caps[2].to_string()));
    }
    if let Some(caps) = X_TO_Y.captures(text) {
        let origin = normalize_place(&caps[1], true);
        let destination = normalize_place(&caps[2], false);
        if let (Some(o), Some(d)) = (origin, destination) {
            return Some((o, d));
        }
    }
    for caps in X_DASH_Y.captures_iter(text) {
        let origin = normalize_place(&caps[1], true);
        let destination = normalize_place(&caps[2], false);
        if let (Some(o), Some(d)) = (origin, destination)
            && o != d
        {
            return Some((o, d));
        }
    }
    None
}

/// Maps a captured phrase to an airport code. Origins are read from the end
/// of the phrase, destinations from the start.
fn normalize_place(raw: &str, from_end: bool) -> Option<String> {
    let words: Vec<&str> = raw
        .split_whitespace()
        .filter(|w| !FILLER.contains(&w.to_lowercase().as_str()))
        .collect();
    if words.is_empty() {
        return None;
    }
    for len in (1..=words.len().min(2)).rev() {
        let slice = if from_end {
            &words[words.len() - len..]
        } else {
            &words[..len]
        };
        let phrase = slice.join(" ").to_lowercase();
        if let Some(code) = CITY_CODES.get(phrase.as_str()) {
            return Some(code.to_string());
        }
    }
    let word = if from_end {
        words[words.len() - 1]
    } else {
        words[0]
    };
    if word.len() == 3 && word.chars().all(|c| c.is_ascii_uppercase()) {
        return Some(word.to_string());
    }
    None
}
