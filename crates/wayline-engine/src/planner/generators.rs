//! Per-intent step chains. Every generator is a pure function of its inputs.

use super::route::web_search_url;
use wayline_common::{
    AutomationIntent, AutomationStep, CommandParameters, ElementSelector, IntentKind, StepKind,
};

/// How long the wait step after a navigate may take.
pub const PAGE_SETTLE_MS: u64 = 3000;
const RESULTS_WAIT_MS: u64 = 10_000;
const MAX_RESEARCH_SOURCES: usize = 3;

const SEARCH_INPUT_CSS: &str = "input[type=\"search\"], input[name=\"q\"], input[name*=\"search\" i], textarea[name=\"q\"]";
const SUBMIT_CSS: &str = "button[type=\"submit\"], input[type=\"submit\"]";
const CONTENT_CSS: &str = "main, article, [role=\"main\"], #search, #content";

/// Steps for `intent`, or `None` when no generator handles its kind.
pub fn generate(
    intent: &AutomationIntent,
    params: &CommandParameters,
) -> Option<Vec<AutomationStep>> {
    let steps = match intent.kind {
        IntentKind::Search => search(intent, params),
        IntentKind::FormFill => form_fill(intent, params),
        IntentKind::DataExtract => data_extract(intent, params),
        IntentKind::Research => research(intent, params),
        IntentKind::Navigate => navigate(intent, params),
        IntentKind::Monitor => monitor(intent, params),
        IntentKind::Unknown => return None,
    };
    Some(steps)
}

fn query_text(intent: &AutomationIntent, params: &CommandParameters) -> String {
    if params.search_terms.is_empty() {
        intent.description.clone()
    } else {
        params.search_terms.join(" ")
    }
}

fn open(url: &str) -> Vec<AutomationStep> {
    vec![
        AutomationStep::navigate(url, format!("Open {}", url)),
        settle(),
    ]
}

fn settle() -> AutomationStep {
    AutomationStep::wait_for(ElementSelector::page(), PAGE_SETTLE_MS, "Wait for page load")
}

fn screenshot() -> AutomationStep {
    AutomationStep::screenshot("Capture final state")
}

fn extract(target: ElementSelector, description: impl Into<String>) -> AutomationStep {
    AutomationStep::new(StepKind::Extract, target, description)
}

/// Maps an extraction target word, or a literal CSS selector, to a locator.
pub fn extraction_selector(target: &str) -> ElementSelector {
    let t = target.trim();
    match t.to_lowercase().as_str() {
        "table" | "tables" => ElementSelector::css("table"),
        "link" | "links" => ElementSelector::css("a[href]"),
        "image" | "images" => ElementSelector::css("img"),
        "heading" | "headings" | "titles" => ElementSelector::css("h1, h2, h3"),
        "list" | "lists" => ElementSelector::css("ul, ol"),
        "price" | "prices" => ElementSelector::css("[class*=\"price\" i], [data-price]"),
        "text" | "content" | "page" => ElementSelector::css(CONTENT_CSS),
        _ if t.starts_with(['.', '#', '[']) || t.contains(['>', '=']) => ElementSelector::css(t),
        _ => ElementSelector::text(t),
    }
}

fn search(intent: &AutomationIntent, params: &CommandParameters) -> Vec<AutomationStep> {
    let query = query_text(intent, params);
    let mut steps = Vec::new();
    match params.urls.first() {
        Some(url) => {
            steps.extend(open(url));
            steps.push(
                AutomationStep::new(
                    StepKind::Type,
                    ElementSelector::css(SEARCH_INPUT_CSS).with_placeholder("Search"),
                    "Enter search terms",
                )
                .with_value(&query),
            );
            steps.push(
                AutomationStep::new(StepKind::KeyPress, ElementSelector::page(), "Submit search")
                    .with_value("Enter"),
            );
        }
        None => steps.extend(open(&web_search_url(&query))),
    }
    steps.push(AutomationStep::wait_for(
        ElementSelector::css(CONTENT_CSS),
        RESULTS_WAIT_MS,
        "Wait for results",
    ));
    steps.push(extract(ElementSelector::css(CONTENT_CSS), "Extract results"));
    steps.push(screenshot());
    steps
}

fn form_fill(intent: &AutomationIntent, params: &CommandParameters) -> Vec<AutomationStep> {
    let url = params
        .urls
        .first()
        .cloned()
        .unwrap_or_else(|| web_search_url(&intent.description));
    let mut steps = open(&url);
    for (field, value) in &params.form_data {
        let css = format!("[name=\"{0}\"], #{0}", field);
        steps.push(
            AutomationStep::new(
                StepKind::Type,
                ElementSelector::css(css).with_placeholder(field).with_text(field),
                format!("Fill {}", field),
            )
            .with_value(value),
        );
    }
    steps.push(AutomationStep::new(
        StepKind::Click,
        ElementSelector::css(SUBMIT_CSS).with_text("Submit"),
        "Submit form",
    ));
    steps.push(AutomationStep::wait_for(
        ElementSelector::page(),
        RESULTS_WAIT_MS,
        "Wait for submission",
    ));
    steps.push(screenshot());
    steps
}

fn data_extract(intent: &AutomationIntent, params: &CommandParameters) -> Vec<AutomationStep> {
    let url = params
        .urls
        .first()
        .cloned()
        .unwrap_or_else(|| web_search_url(&query_text(intent, params)));
    let mut steps = open(&url);
    if params.extraction_targets.is_empty() {
        steps.push(extract(ElementSelector::css(CONTENT_CSS), "Extract page content"));
    } else {
        for target in &params.extraction_targets {
            steps.push(extract(
                extraction_selector(target),
                format!("Extract {}", target),
            ));
        }
    }
    steps.push(screenshot());
    steps
}

fn research(intent: &AutomationIntent, params: &CommandParameters) -> Vec<AutomationStep> {
    let sources: Vec<String> = if params.urls.is_empty() {
        vec![web_search_url(&query_text(intent, params))]
    } else {
        params
            .urls
            .iter()
            .take(MAX_RESEARCH_SOURCES)
            .cloned()
            .collect()
    };
    let mut steps = Vec::new();
    for url in &sources {
        steps.extend(open(url));
        steps.push(extract(
            ElementSelector::css(CONTENT_CSS),
            format!("Extract findings from {}", url),
        ));
    }
    steps.push(screenshot());
    steps
}

fn navigate(intent: &AutomationIntent, params: &CommandParameters) -> Vec<AutomationStep> {
    let url = params
        .urls
        .first()
        .cloned()
        .unwrap_or_else(|| web_search_url(&intent.description));
    let mut steps = open(&url);
    steps.push(screenshot());
    steps
}

fn monitor(intent: &AutomationIntent, params: &CommandParameters) -> Vec<AutomationStep> {
    let url = params
        .urls
        .first()
        .cloned()
        .unwrap_or_else(|| web_search_url(&query_text(intent, params)));
    let mut steps = open(&url);
    let targets: Vec<ElementSelector> = if params.extraction_targets.is_empty() {
        vec![ElementSelector::css(CONTENT_CSS)]
    } else {
        params
            .extraction_targets
            .iter()
            .map(|t| extraction_selector(t))
            .collect()
    };
    for target in targets {
        let description = format!("Record {}", target.describe());
        steps.push(extract(target, description));
    }
    steps.push(screenshot());
    steps
}
