//! Page observations produced by in-page scripts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structural overview of the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub forms: usize,
    pub inputs: usize,
    pub buttons: usize,
    pub links: usize,
    pub tables: usize,
    pub iframes: usize,
    pub has_search_box: bool,
}

impl PageSummary {
    pub fn is_interactive(&self) -> bool {
        self.inputs > 0 || self.buttons > 0 || self.forms > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementSnapshot {
    pub tag: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableSnapshot {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableSnapshot {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }
}

/// A fillable field as seen by the field detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldCandidate {
    /// Unique CSS selector for the element.
    pub selector: String,
    pub tag: String,
    pub input_type: String,
    pub name: String,
    pub id: String,
    pub placeholder: String,
    pub label: String,
    pub nearby_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChallengeProbe {
    pub detected: bool,
    pub signals: Vec<String>,
}
