use super::{ActionAdvisor, Advice, IntentClassifier, ServiceError, SiteSelector};
use crate::planner::route::RouteIntent;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use wayline_common::{AutomationStep, Classification, PageSummary, StepResult};

fn client(timeout: Duration) -> Result<Client, ServiceError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

async fn post_json(client: &Client, endpoint: &str, body: &Value) -> Result<String, ServiceError> {
    debug!("POST {}", endpoint);
    let resp = client.post(endpoint).json(body).send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(ServiceError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

/// Classifies commands by POSTing `{"command": ...}` to a remote service.
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl IntentClassifier for HttpClassifier {
    async fn classify(&self, command: &str) -> Result<Classification, ServiceError> {
        let text = post_json(&self.client, &self.endpoint, &json!({ "command": command })).await?;
        serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

pub struct HttpSiteSelector {
    client: Client,
    endpoint: String,
}

impl HttpSiteSelector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SiteSelector for HttpSiteSelector {
    async fn select_sites(
        &self,
        search_text: &str,
        route: &RouteIntent,
    ) -> Result<String, ServiceError> {
        let body = json!({
            "searchText": search_text,
            "route": {
                "origin": route.origin,
                "destination": route.destination,
            },
        });
        post_json(&self.client, &self.endpoint, &body).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum AdviceReply {
    Act { step: AutomationStep },
    Done {
        #[serde(default)]
        summary: String,
    },
}

/// Asks a remote service for the next step of an autonomous run.
pub struct HttpAdvisor {
    client: Client,
    endpoint: String,
}

impl HttpAdvisor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ActionAdvisor for HttpAdvisor {
    async fn next_step(
        &self,
        goal: &str,
        observation: &PageSummary,
        history: &[StepResult],
    ) -> Result<Advice, ServiceError> {
        let history: Vec<Value> = history
            .iter()
            .map(|r| {
                json!({
                    "type": r.kind,
                    "success": r.success,
                    "error": r.error.as_ref().map(|e| e.to_string()),
                })
            })
            .collect();
        let body = json!({
            "goal": goal,
            "observation": observation,
            "history": history,
        });
        let text = post_json(&self.client, &self.endpoint, &body).await?;
        let reply: AdviceReply =
            serde_json::from_str(&text).map_err(|e| ServiceError::Decode(e.to_string()))?;
        Ok(match reply {
            AdviceReply::Act { step } => Advice::Act(step),
            AdviceReply::Done { summary } => Advice::Done(summary),
        })
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        let resp = self.client.get(&self.endpoint).send().await?;
        if resp.status().is_server_error() {
            return Err(ServiceError::Unavailable(format!(
                "{} answered {}",
                self.endpoint,
                resp.status()
            )));
        }
        Ok(())
    }
}
