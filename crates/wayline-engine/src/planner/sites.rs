//! Registry of known destination sites for multi-target plans.

use super::route::{RouteIntent, flight_search_url};
use url::Url;
use wayline_common::{AutomationStep, ElementSelector, StepKind};

/// Selectors tried, in one step, to submit a search form on an unknown site.
pub const SEARCH_BUTTON_CSS: &str = "button[type=\"submit\"], input[type=\"submit\"], .search-button, .btn-search, #search-btn";

/// A known site: how to reach it, how reliable it is and which steps drive it.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub key: &'static str,
    pub name: &'static str,
    /// Registrable domain, matched as a suffix of the URL host.
    pub domain: &'static str,
    /// Required URL path prefix, for sites sharing a domain with unrelated pages.
    pub path_prefix: Option<&'static str>,
    /// Lower is more reliable. Unranked sites sort after ranked ones.
    pub rank: Option<u32>,
    pub bot_hostile: bool,
    pub results_css: &'static str,
    pub results_text: Option<&'static str>,
    pub settle_ms: u64,
    pub search_url: fn(&RouteIntent) -> String,
    pub template: fn(&RouteIntent) -> Vec<AutomationStep>,
}

impl SiteProfile {
    pub fn results(&self) -> ElementSelector {
        let sel = ElementSelector::css(self.results_css);
        match self.results_text {
            Some(text) => sel.with_text(text),
            None => sel,
        }
    }

    /// Matches the domain or any subdomain of it, plus country variants of
    /// the same brand (`kayak.co.uk`, `expedia.de`). Only the label right
    /// before the public suffix counts as the brand.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        if host == self.domain || host.ends_with(&format!(".{}", self.domain)) {
            return true;
        }
        let brand = self.domain.split('.').next();
        brand.is_some() && brand_label(&host) == brand
    }

    fn matches_name(&self, name: &str) -> bool {
        let squash = |s: &str| {
            s.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        };
        let wanted = squash(name);
        wanted == squash(self.name) || wanted == squash(self.key)
    }
}

/// Second-level labels used under country codes, as in `co.uk` or `com.au`.
const SECOND_LEVEL: &[&str] = &["co", "com", "net", "org", "ac", "gov"];

/// The label before the public suffix: `kayak` for `www.kayak.co.uk`,
/// `evil` for `kayak.evil.com`.
fn brand_label(host: &str) -> Option<&str> {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let n = labels.len();
    if n < 2 {
        return None;
    }
    let country_pair =
        n >= 3 && labels[n - 1].len() == 2 && SECOND_LEVEL.contains(&labels[n - 2]);
    if country_pair {
        Some(labels[n - 3])
    } else {
        Some(labels[n - 2])
    }
}

/// A site chosen for a plan, with the URL it should be opened at.
#[derive(Debug, Clone)]
pub struct SiteVisit {
    pub name: String,
    pub url: String,
    pub profile: Option<SiteProfile>,
}

#[derive(Debug, Clone)]
pub struct SiteRegistry {
    sites: Vec<SiteProfile>,
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SiteRegistry {
    pub fn empty() -> Self {
        Self { sites: Vec::new() }
    }

    pub fn builtin() -> Self {
        Self {
            sites: vec![
                google_flights(),
                kayak(),
                momondo(),
                skyscanner(),
                expedia(),
                makemytrip(),
                cleartrip(),
            ],
        }
    }

    /// Adds a site, replacing any existing entry with the same key.
    pub fn register(&mut self, profile: SiteProfile) {
        self.sites.retain(|s| s.key != profile.key);
        self.sites.push(profile);
    }

    pub fn get(&self, key: &str) -> Option<&SiteProfile> {
        self.sites.iter().find(|s| s.key == key)
    }

    pub fn by_name(&self, name: &str) -> Option<&SiteProfile> {
        self.sites.iter().find(|s| s.matches_name(name))
    }

    pub fn by_url(&self, url: &str) -> Option<&SiteProfile> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        self.sites.iter().find(|s| {
            s.matches_host(host) && s.path_prefix.is_none_or(|p| parsed.path().starts_with(p))
        })
    }

    /// Static shortlist used when no site selector is available or it fails.
    pub fn default_shortlist(&self, route: &RouteIntent) -> Vec<&SiteProfile> {
        let keys: &[&str] = if route.is_uk_to_india() {
            &["google_flights", "makemytrip", "kayak", "cleartrip"]
        } else {
            &["google_flights", "kayak", "momondo", "skyscanner"]
        };
        keys.iter().filter_map(|k| self.get(k)).collect()
    }

    pub fn visit(&self, profile: &SiteProfile, route: &RouteIntent) -> SiteVisit {
        SiteVisit {
            name: profile.name.to_string(),
            url: (profile.search_url)(route),
            profile: Some(profile.clone()),
        }
    }
}

/// Steps for one site: navigate, settle, analyze, optional challenge probe,
/// the site template, extract and screenshot.
pub fn site_steps(visit: &SiteVisit, route: &RouteIntent) -> Vec<AutomationStep> {
    let mut steps = vec![AutomationStep::navigate(
        &visit.url,
        format!("Open {}", visit.name),
    )];
    match &visit.profile {
        Some(profile) => {
            steps.push(AutomationStep::wait_for(
                ElementSelector::page(),
                profile.settle_ms,
                format!("Let {} settle", profile.name),
            ));
            steps.push(page_step(
                StepKind::AnalyzePage,
                format!("Analyze {}", profile.name),
            ));
            if profile.bot_hostile {
                steps.push(page_step(
                    StepKind::CaptchaCheck,
                    format!("Check {} for bot challenges", profile.name),
                ));
            }
            steps.extend((profile.template)(route));
            steps.push(
                AutomationStep::new(
                    StepKind::Extract,
                    profile.results(),
                    format!("Extract results from {}", profile.name),
                )
                .with_timeout(15_000),
            );
        }
        None => {
            steps.push(AutomationStep::wait_for(
                ElementSelector::page(),
                3000,
                format!("Let {} settle", visit.name),
            ));
            steps.push(page_step(
                StepKind::AnalyzePage,
                format!("Analyze {}", visit.name),
            ));
            steps.extend(generic_template(route));
            steps.push(AutomationStep::new(
                StepKind::Extract,
                ElementSelector::css("main, [role=\"main\"], body"),
                format!("Extract results from {}", visit.name),
            ));
        }
    }
    steps.push(AutomationStep::screenshot(format!(
        "Capture {}",
        visit.name
    )));
    steps
}

fn page_step(kind: StepKind, description: String) -> AutomationStep {
    AutomationStep::new(kind, ElementSelector::page(), description).with_retries(1)
}

/// Fills departure and destination by field semantics, then submits.
pub fn generic_template(route: &RouteIntent) -> Vec<AutomationStep> {
    let mut fields = serde_json::Map::new();
    if let Some(origin) = &route.origin {
        fields.insert("departure".into(), origin.clone().into());
    }
    if let Some(destination) = &route.destination {
        fields.insert("destination".into(), destination.clone().into());
    }
    if fields.is_empty() {
        return Vec::new();
    }
    vec![
        AutomationStep::new(
            StepKind::SmartFill,
            ElementSelector::css("form, body"),
            "Fill route fields",
        )
        .with_value(serde_json::Value::Object(fields).to_string())
        .with_retries(2),
        AutomationStep::new(
            StepKind::Click,
            ElementSelector::css(SEARCH_BUTTON_CSS).with_text("Search"),
            "Submit search",
        )
        .with_retries(2),
        AutomationStep::wait_for(ElementSelector::page(), 5000, "Wait for results"),
    ]
}

fn codes(route: &RouteIntent) -> Option<(String, String)> {
    if route.has_codes() {
        Some((route.origin.clone()?, route.destination.clone()?))
    } else {
        None
    }
}

fn google_flights_url(route: &RouteIntent) -> String {
    flight_search_url(&route.search_phrase())
}

fn google_flights() -> SiteProfile {
    SiteProfile {
        key: "google_flights",
        name: "Google Flights",
        domain: "google.com",
        path_prefix: Some("/travel/flights"),
        rank: Some(1),
        bot_hostile: false,
        results_css: "ul[role=\"list\"] li",
        results_text: None,
        settle_ms: 4000,
        search_url: google_flights_url,
        template: |_| {
            vec![
                AutomationStep::new(
                    StepKind::Click,
                    ElementSelector::css("button[aria-label=\"Search\"]").with_text("Search"),
                    "Run the flight search",
                )
                .with_timeout(5000)
                .with_retries(1),
                AutomationStep::wait_for(
                    ElementSelector::css("ul[role=\"list\"] li"),
                    15_000,
                    "Wait for flight list",
                ),
            ]
        },
    }
}

fn kayak() -> SiteProfile {
    SiteProfile {
        key: "kayak",
        name: "Kayak",
        domain: "kayak.com",
        path_prefix: None,
        rank: Some(2),
        bot_hostile: false,
        results_css: "[data-resultid]",
        results_text: None,
        settle_ms: 5000,
        search_url: |route| match codes(route) {
            Some((o, d)) => format!("https://www.kayak.com/flights/{}-{}", o, d),
            None => "https://www.kayak.com/flights".to_string(),
        },
        template: |route| {
            if route.has_codes() {
                vec![AutomationStep::wait_for(
                    ElementSelector::css("[data-resultid]"),
                    20_000,
                    "Wait for Kayak results",
                )]
            } else {
                generic_template(route)
            }
        },
    }
}

fn momondo() -> SiteProfile {
    SiteProfile {
        key: "momondo",
        name: "Momondo",
        domain: "momondo.com",
        path_prefix: None,
        rank: Some(3),
        bot_hostile: false,
        results_css: "[data-resultid]",
        results_text: None,
        settle_ms: 5000,
        search_url: |route| match codes(route) {
            Some((o, d)) => format!("https://www.momondo.com/flight-search/{}-{}", o, d),
            None => "https://www.momondo.com/".to_string(),
        },
        template: |route| {
            if route.has_codes() {
                vec![AutomationStep::wait_for(
                    ElementSelector::css("[data-resultid]"),
                    20_000,
                    "Wait for Momondo results",
                )]
            } else {
                generic_template(route)
            }
        },
    }
}

fn skyscanner() -> SiteProfile {
    SiteProfile {
        key: "skyscanner",
        name: "Skyscanner",
        domain: "skyscanner.net",
        path_prefix: None,
        rank: Some(4),
        bot_hostile: true,
        results_css: "[data-testid=\"itinerary\"], a[class*=\"FlightsTicket\"]",
        results_text: Some("Best"),
        settle_ms: 6000,
        search_url: |route| match codes(route) {
            Some((o, d)) => format!(
                "https://www.skyscanner.net/transport/flights/{}/{}/",
                o.to_lowercase(),
                d.to_lowercase()
            ),
            None => "https://www.skyscanner.net/".to_string(),
        },
        template: |_| {
            vec![AutomationStep::wait_for(
                ElementSelector::css("[data-testid=\"itinerary\"]").with_text("Best"),
                20_000,
                "Wait for Skyscanner itineraries",
            )]
        },
    }
}

fn expedia() -> SiteProfile {
    SiteProfile {
        key: "expedia",
        name: "Expedia",
        domain: "expedia.com",
        path_prefix: None,
        rank: Some(5),
        bot_hostile: true,
        results_css: "[data-test-id=\"offer-listing\"]",
        results_text: None,
        settle_ms: 6000,
        search_url: |route| match codes(route) {
            Some((o, d)) => format!(
                "https://www.expedia.com/Flights-Search?leg1=from:{},to:{}&mode=search&trip=oneway",
                o, d
            ),
            None => "https://www.expedia.com/Flights".to_string(),
        },
        template: |_| {
            vec![AutomationStep::wait_for(
                ElementSelector::css("[data-test-id=\"offer-listing\"]"),
                20_000,
                "Wait for Expedia offers",
            )]
        },
    }
}

fn makemytrip() -> SiteProfile {
    SiteProfile {
        key: "makemytrip",
        name: "MakeMyTrip",
        domain: "makemytrip.com",
        path_prefix: None,
        rank: None,
        bot_hostile: false,
        results_css: ".listingCard",
        results_text: Some("View Prices"),
        settle_ms: 5000,
        search_url: |route| match codes(route) {
            Some((o, d)) => format!(
                "https://www.makemytrip.com/flight/search?itinerary={}-{}&tripType=O&paxType=A-1_C-0_I-0&cabinClass=E",
                o, d
            ),
            None => "https://www.makemytrip.com/flights/".to_string(),
        },
        template: |route| {
            if route.has_codes() {
                vec![AutomationStep::wait_for(
                    ElementSelector::css(".listingCard").with_text("View Prices"),
                    20_000,
                    "Wait for MakeMyTrip listings",
                )]
            } else {
                generic_template(route)
            }
        },
    }
}

fn cleartrip() -> SiteProfile {
    SiteProfile {
        key: "cleartrip",
        name: "Cleartrip",
        domain: "cleartrip.com",
        path_prefix: None,
        rank: None,
        bot_hostile: false,
        results_css: "[data-testid=\"airlineBlock\"]",
        results_text: None,
        settle_ms: 5000,
        search_url: |route| match codes(route) {
            Some((o, d)) => format!(
                "https://www.cleartrip.com/flights/results?from={}&to={}&adults=1&class=Economy",
                o, d
            ),
            None => "https://www.cleartrip.com/flights".to_string(),
        },
        template: |route| {
            if route.has_codes() {
                vec![AutomationStep::wait_for(
                    ElementSelector::css("[data-testid=\"airlineBlock\"]"),
                    20_000,
                    "Wait for Cleartrip results",
                )]
            } else {
                generic_template(route)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::route::classify_route;

    #[test]
    fn test_lookup_by_url_and_name() {
        let registry = SiteRegistry::builtin();
        assert_eq!(
            registry.by_url("https://www.kayak.co.uk/flights/LHR-BOM").map(|s| s.key),
            Some("kayak")
        );
        assert_eq!(
            registry.by_url("https://www.skyscanner.net/x").map(|s| s.bot_hostile),
            Some(true)
        );
        assert_eq!(registry.by_name("Make My Trip").map(|s| s.key), Some("makemytrip"));
        assert!(registry.by_url("https://example.org").is_none());
        assert!(registry.by_url("https://www.google.com/search?q=x").is_none());
        assert_eq!(
            registry
                .by_url("https://www.google.com/travel/flights?q=x")
                .map(|s| s.rank),
            Some(Some(1))
        );
    }

    #[test]
    fn test_lookalike_hosts_do_not_inherit_profiles() {
        let registry = SiteRegistry::builtin();
        assert!(registry.by_url("https://kayak.evil.com/flights").is_none());
        assert!(registry.by_url("https://skyscanner.example.net/x").is_none());
        assert!(registry.by_url("https://notkayak.com/flights").is_none());
        assert_eq!(
            registry.by_url("https://www.expedia.de/Flights").map(|s| s.key),
            Some("expedia")
        );
        assert_eq!(
            registry.by_url("https://flights.kayak.com/x").map(|s| s.key),
            Some("kayak")
        );
    }

    #[test]
    fn test_uk_india_shortlist() {
        let registry = SiteRegistry::builtin();
        let route = classify_route("flights from London to Mumbai").unwrap();
        let keys: Vec<_> = registry.default_shortlist(&route).iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["google_flights", "makemytrip", "kayak", "cleartrip"]);

        let other = classify_route("flights from Paris to Dubai").unwrap();
        let keys: Vec<_> = registry.default_shortlist(&other).iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["google_flights", "kayak", "momondo", "skyscanner"]);
    }

    #[test]
    fn test_hostile_site_gets_challenge_probe() {
        let registry = SiteRegistry::builtin();
        let route = classify_route("flights LHR to BOM").unwrap();
        let visit = registry.visit(registry.get("skyscanner").unwrap(), &route);
        assert_eq!(visit.url, "https://www.skyscanner.net/transport/flights/lhr/bom/");
        let kinds: Vec<_> = site_steps(&visit, &route).iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StepKind::Navigate,
                StepKind::Wait,
                StepKind::AnalyzePage,
                StepKind::CaptchaCheck,
                StepKind::Wait,
                StepKind::Extract,
                StepKind::Screenshot,
            ]
        );
    }

    #[test]
    fn test_unknown_site_uses_smart_fill() {
        let route = classify_route("flights LHR to BOM").unwrap();
        let visit = SiteVisit {
            name: "Example Air".into(),
            url: "https://air.example.com".into(),
            profile: None,
        };
        let steps = site_steps(&visit, &route);
        let fill = steps.iter().find(|s| s.kind == StepKind::SmartFill).unwrap();
        let value: serde_json::Value = serde_json::from_str(fill.value.as_deref().unwrap()).unwrap();
        assert_eq!(value["departure"], "LHR");
        assert_eq!(value["destination"], "BOM");
        assert!(steps.iter().all(|s| s.kind != StepKind::CaptchaCheck));
    }
}
