//! Jira Cloud REST v3 client.

use crate::error::TrackerError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tp_core::error::ClassifiedError;
use tp_core::services::{Ticketing, TransitionMap};
use tp_core::types::{Ticket, TicketKey};
use tracing::{debug, warn};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESULTS: &str = "100";
const SEARCH_FIELDS: &str = "summary,description,status,priority,assignee";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub api_token: String,
}

impl JiraConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.base_url.trim().is_empty() {
            return Err(TrackerError::InvalidConfig("jira base_url is required".into()));
        }
        if self.email.trim().is_empty() {
            return Err(TrackerError::InvalidConfig("jira email is required".into()));
        }
        if self.api_token.trim().is_empty() {
            return Err(TrackerError::InvalidConfig("jira api token is required".into()));
        }
        Ok(())
    }
}

pub struct JiraTracker {
    cfg: JiraConfig,
    base: Url,
    client: Client,
}

impl JiraTracker {
    pub fn new(cfg: JiraConfig) -> Result<Self, TrackerError> {
        cfg.validate()?;
        let trimmed = cfg.base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|err| TrackerError::InvalidConfig(format!("jira base_url: {err}")))?;
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|source| TrackerError::Http {
                op: "build client",
                source,
            })?;
        Ok(Self { cfg, base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TrackerError> {
        self.base
            .join(path)
            .map_err(|err| TrackerError::InvalidConfig(format!("endpoint {path:?}: {err}")))
    }

    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response, TrackerError> {
        request
            .basic_auth(&self.cfg.email, Some(&self.cfg.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| TrackerError::Http { op, source })
    }

    async fn search(&self, jql: &str) -> Result<Vec<Ticket>, TrackerError> {
        let url = self.endpoint("rest/api/3/search/jql")?;
        let request = self.client.get(url).query(&[
            ("jql", jql),
            ("maxResults", MAX_RESULTS),
            ("fields", SEARCH_FIELDS),
        ]);
        let response = self.send("search issues", request).await?;
        if response.status() != StatusCode::OK {
            return Err(api_error("search issues", response).await);
        }
        let body: SearchResponse = response.json().await.map_err(|source| TrackerError::Http {
            op: "search issues",
            source,
        })?;

        let mut tickets = Vec::with_capacity(body.issues.len());
        for issue in body.issues {
            match TicketKey::new(issue.key) {
                Ok(key) => tickets.push(Ticket::new(
                    key,
                    issue.fields.summary,
                    description_text(&issue.fields.description),
                )),
                Err(err) => warn!(id = %issue.id, error = %err, "skipping issue without key"),
            }
        }
        Ok(tickets)
    }
}

#[async_trait]
impl Ticketing for JiraTracker {
    async fn fetch_tickets(
        &self,
        assignee: &str,
        project: &str,
    ) -> Result<Vec<Ticket>, ClassifiedError> {
        let jql = assigned_todo_jql(assignee, project);
        debug!(jql = %jql, "searching jira");
        let tickets = self.search(&jql).await?;
        debug!(count = tickets.len(), "fetched jira issues");
        Ok(tickets)
    }

    async fn update_status(
        &self,
        key: &TicketKey,
        status: &str,
        transitions: &TransitionMap,
    ) -> Result<(), ClassifiedError> {
        let Some(id) = transitions.get(status) else {
            return Err(TrackerError::MissingTransition {
                status: status.to_string(),
            }
            .into());
        };
        let mut url = self.endpoint("rest/api/3/issue/")?;
        url.path_segments_mut()
            .map_err(|()| TrackerError::InvalidConfig("jira base_url cannot be a base".into()))?
            .pop_if_empty()
            .extend([key.as_str(), "transitions"]);
        let payload = TransitionRequest {
            transition: TransitionId { id },
        };
        let response = self
            .send("transition issue", self.client.post(url).json(&payload))
            .await?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(api_error("transition issue", response).await.into());
        }
        debug!(key = %key, status, "transitioned issue");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ClassifiedError> {
        let url = self.endpoint("rest/api/3/myself")?;
        let response = self.send("current user", self.client.get(url)).await?;
        if response.status() != StatusCode::OK {
            return Err(api_error("current user", response).await.into());
        }
        let me: Myself = response.json().await.map_err(|source| TrackerError::Http {
            op: "current user",
            source,
        })?;
        debug!(account = %me.account_id, "jira credentials ok");
        Ok(())
    }
}

/// Assigned, not-yet-started issues, highest priority first.
pub fn assigned_todo_jql(assignee: &str, project: &str) -> String {
    format!(
        "assignee = '{}' AND project = '{}' AND statusCategory = 'To Do' ORDER BY priority ASC",
        escape_jql(assignee),
        escape_jql(project)
    )
}

fn escape_jql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Descriptions arrive either as plain strings or as Atlassian documents.
pub fn description_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(_) => {
            let mut out = String::new();
            collect_text(value, &mut out);
            out
        }
        _ => String::new(),
    }
}

fn collect_text(node: &Value, out: &mut String) {
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        out.push_str(text);
    }
    if let Some(children) = node.get("content").and_then(Value::as_array) {
        for child in children {
            collect_text(child, out);
        }
    }
    if node.get("type").and_then(Value::as_str) == Some("paragraph") && !out.ends_with('\n') {
        out.push('\n');
    }
}

async fn api_error(op: &'static str, response: Response) -> TrackerError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(parsed) => {
            let mut parts = parsed.error_messages;
            parts.extend(
                parsed
                    .errors
                    .into_iter()
                    .map(|(field, message)| format!("{field}: {message}")),
            );
            if parts.is_empty() {
                format!("HTTP {status}")
            } else {
                parts.join("; ")
            }
        }
        Err(_) => text.trim().to_string(),
    };
    TrackerError::Api {
        op,
        status,
        message,
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    #[serde(default)]
    id: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    fields: IssueFields,
}

#[derive(Debug, Default, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Value,
}

#[derive(Debug, Serialize)]
struct TransitionRequest<'a> {
    transition: TransitionId<'a>,
}

#[derive(Debug, Serialize)]
struct TransitionId<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Myself {
    #[serde(default)]
    account_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    #[serde(default)]
    error_messages: Vec<String>,
    #[serde(default)]
    errors: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use base64::Engine as _;
    use serde_json::json;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn tracker(base_url: String) -> JiraTracker {
        JiraTracker::new(JiraConfig {
            base_url,
            email: "bot@example.com".to_string(),
            api_token: "tok".to_string(),
        })
        .unwrap()
    }

    fn expected_auth() -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode("bot@example.com:tok");
        format!("Basic {encoded}")
    }

    #[test]
    fn jql_escapes_quotes() {
        assert_eq!(
            assigned_todo_jql("o'brien", "PROJ"),
            "assignee = 'o\\'brien' AND project = 'PROJ' AND statusCategory = 'To Do' ORDER BY priority ASC"
        );
    }

    #[test]
    fn descriptions_from_documents() {
        assert_eq!(description_text(&json!("plain")), "plain");
        assert_eq!(description_text(&Value::Null), "");
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "Add a "},
                    {"type": "text", "text": "health endpoint"}
                ]},
                {"type": "paragraph", "content": [{"type": "text", "text": "Return 200."}]}
            ]
        });
        assert_eq!(description_text(&doc), "Add a health endpoint\nReturn 200.\n");
    }

    #[test]
    fn config_requires_credentials() {
        let err = JiraTracker::new(JiraConfig {
            base_url: "https://acme.atlassian.net".to_string(),
            email: "bot@example.com".to_string(),
            api_token: String::new(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, TrackerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn fetches_assigned_tickets() {
        let auth = expected_auth();
        let router = Router::new().route(
            "/rest/api/3/search/jql",
            get(
                move |headers: HeaderMap, Query(params): Query<HashMap<String, String>>| async move {
                    assert_eq!(headers["authorization"], auth.as_str());
                    assert!(params["jql"].starts_with("assignee = 'bot' AND project = 'PROJ'"));
                    assert_eq!(params["maxResults"], "100");
                    Json(json!({
                        "issues": [
                            {"id": "1", "key": "PROJ-12", "fields": {
                                "summary": "Add service",
                                "description": {"type": "doc", "content": [
                                    {"type": "paragraph", "content": [{"type": "text", "text": "details"}]}
                                ]}
                            }},
                            {"id": "2", "key": "", "fields": {"summary": "broken"}},
                            {"id": "3", "key": "PROJ-13", "fields": {"summary": "Other", "description": null}}
                        ]
                    }))
                },
            ),
        );
        let tracker = tracker(serve(router).await);
        let tickets = tracker.fetch_tickets("bot", "PROJ").await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].key.as_str(), "PROJ-12");
        assert_eq!(tickets[0].summary, "Add service");
        assert_eq!(tickets[0].description, "details\n");
        assert_eq!(tickets[1].description, "");
    }

    #[tokio::test]
    async fn search_errors_are_classified() {
        let router = Router::new().route(
            "/rest/api/3/search/jql",
            get(|| async {
                (
                    HttpStatus::BAD_REQUEST,
                    Json(json!({"errorMessages": ["Field 'assignee' is invalid"], "errors": {}})),
                )
            }),
        );
        let tracker = tracker(serve(router).await);
        let err = tracker.fetch_tickets("bot", "PROJ").await.unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("Field 'assignee' is invalid"));

        let router = Router::new().route(
            "/rest/api/3/search/jql",
            get(|| async { HttpStatus::SERVICE_UNAVAILABLE }),
        );
        let tracker = self::tracker(serve(router).await);
        assert!(tracker.fetch_tickets("bot", "PROJ").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn transitions_use_the_configured_id() {
        let router = Router::new().route(
            "/rest/api/3/issue/{key}/transitions",
            post(
                |Path(key): Path<String>, Json(body): Json<Value>| async move {
                    assert_eq!(key, "PROJ-12");
                    assert_eq!(body, json!({"transition": {"id": "31"}}));
                    HttpStatus::NO_CONTENT
                },
            ),
        );
        let tracker = tracker(serve(router).await);
        let key = TicketKey::new("PROJ-12").unwrap();
        let transitions = TransitionMap::from([("Done".to_string(), "31".to_string())]);
        tracker.update_status(&key, "Done", &transitions).await.unwrap();

        let err = tracker
            .update_status(&key, "Blocked", &transitions)
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::MissingTransition { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_transition_is_an_error() {
        let router = Router::new().route(
            "/rest/api/3/issue/{key}/transitions",
            post(|| async {
                (
                    HttpStatus::BAD_REQUEST,
                    Json(json!({"errorMessages": [], "errors": {"transition": "not allowed"}})),
                )
            }),
        );
        let tracker = tracker(serve(router).await);
        let key = TicketKey::new("PROJ-12").unwrap();
        let transitions = TransitionMap::from([("Done".to_string(), "31".to_string())]);
        let err = tracker
            .update_status(&key, "Done", &transitions)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transition: not allowed"));
    }

    #[tokio::test]
    async fn health_check_calls_myself() {
        let router = Router::new().route(
            "/rest/api/3/myself",
            get(|| async { Json(json!({"accountId": "abc", "emailAddress": "bot@example.com"})) }),
        );
        tracker(serve(router).await).health_check().await.unwrap();

        let router = Router::new().route(
            "/rest/api/3/myself",
            get(|| async { HttpStatus::UNAUTHORIZED }),
        );
        let err = tracker(serve(router).await).health_check().await.unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("returned 401"));
    }
}
