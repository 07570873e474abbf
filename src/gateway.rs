use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::BackendError;

/// Remote relational store. Rows travel as JSON objects.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), BackendError>;

    async fn update(
        &self,
        table: &str,
        patch: Value,
        match_column: &str,
        match_value: &str,
    ) -> Result<(), BackendError>;

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, BackendError>;
}

/// Row filter rendered as PostgREST query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<(String, String)>,
    order: Option<(String, bool)>,
    limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.conditions
            .push((column.to_string(), format!("eq.{}", value)));
        self
    }

    pub fn gte(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.conditions
            .push((column.to_string(), format!("gte.{}", value)));
        self
    }

    pub fn lte(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.conditions
            .push((column.to_string(), format!("lte.{}", value)));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), "*".to_string())];
        pairs.extend(self.conditions.iter().cloned());
        if let Some((column, ascending)) = &self.order {
            let dir = if *ascending { "asc" } else { "desc" };
            pairs.push(("order".to_string(), format!("{}.{}", column, dir)));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

/// PostgREST client (`{url}/rest/v1/{table}`).
#[derive(Clone)]
pub struct RestGateway {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    code: Option<Value>,
}

impl RestGateway {
    pub fn new(base_url: Url, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("housetrain/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = Url::parse(cfg.backend.url.trim()).context("invalid backend.url")?;
        Self::new(
            base_url,
            cfg.backend.api_key.clone(),
            Duration::from_secs(cfg.backend.timeout_seconds),
        )
    }

    fn table_url(&self, table: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|err| BackendError::Unknown {
                message: format!("invalid table URL for '{}': {}", table, err),
                code: None,
                status: None,
            })
    }

    pub fn build_request(
        &self,
        method: Method,
        table: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<reqwest::Request, BackendError> {
        let mut builder = self
            .http
            .request(method, self.table_url(table)?)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(query);
        if let Some(body) = body {
            builder = builder.header("Prefer", "return=minimal").json(body);
        }
        builder.build().map_err(transport_error)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, BackendError> {
        debug!(method = %request.method(), url = %request.url(), "backend request");
        let res = self.http.execute(request).await.map_err(transport_error)?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body = %body, "backend error response");
            return Err(error_from_body(status.as_u16(), &body));
        }
        Ok(res)
    }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), BackendError> {
        let body = Value::Array(rows);
        let request = self.build_request(Method::POST, table, &[], Some(&body))?;
        self.execute(request).await?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        patch: Value,
        match_column: &str,
        match_value: &str,
    ) -> Result<(), BackendError> {
        let query = Filter::new().eq(match_column, match_value).conditions;
        let request = self.build_request(Method::PATCH, table, &query, Some(&patch))?;
        self.execute(request).await?;
        Ok(())
    }

    async fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Value>, BackendError> {
        let request = self.build_request(Method::GET, table, &filter.to_query_pairs(), None)?;
        let res = self.execute(request).await?;
        let status = res.status().as_u16();
        res.json::<Vec<Value>>()
            .await
            .map_err(|err| BackendError::from_parts(format!("invalid response body: {}", err), None, Some(status)))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Map a transport-level failure onto the taxonomy.
fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        BackendError::Network(err.to_string())
    } else {
        BackendError::from_parts(err.to_string(), None, err.status().map(|s| s.as_u16()))
    }
}

/// Map a non-2xx response body (`{message, code}` or auth-style
/// `{msg}` / `{error_description}`) onto the taxonomy.
pub fn error_from_body(status: u16, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = match parsed.code {
        Some(Value::String(code)) => Some(code),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    };
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("HTTP {}", status)
            } else {
                body.trim().to_string()
            }
        });
    BackendError::from_parts(message, code.as_deref(), Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaObject;
    use serde_json::json;

    fn client(base: &str) -> RestGateway {
        RestGateway::new(Url::parse(base).unwrap(), "anon-key".into(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn filter_renders_postgrest_pairs() {
        let filter = Filter::new()
            .gte("timestamp", "2025-06-01T00:00:00Z")
            .eq("pee", true)
            .order("timestamp", false)
            .limit(50);
        assert_eq!(
            filter.to_query_pairs(),
            vec![
                ("select".to_string(), "*".to_string()),
                ("timestamp".to_string(), "gte.2025-06-01T00:00:00Z".to_string()),
                ("pee".to_string(), "eq.true".to_string()),
                ("order".to_string(), "timestamp.desc".to_string()),
                ("limit".to_string(), "50".to_string()),
            ]
        );
    }

    #[test]
    fn build_request_sets_headers() {
        let gw = client("https://example.supabase.co");
        let body = json!([{ "pee": true }]);
        let request = gw
            .build_request(Method::POST, "walks", &[], Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/walks");
        let headers = request.headers();
        assert_eq!(headers.get("apikey").and_then(|h| h.to_str().ok()), Some("anon-key"));
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()),
            Some("Bearer anon-key")
        );
        assert_eq!(
            headers.get("Prefer").and_then(|h| h.to_str().ok()),
            Some("return=minimal")
        );
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let gw = client("http://localhost:54321/proxy");
        let request = gw
            .build_request(Method::GET, "activities", &Filter::new().limit(1).to_query_pairs(), None)
            .unwrap();
        assert_eq!(request.url().path(), "/proxy/rest/v1/activities");
        assert_eq!(request.url().query(), Some("select=*&limit=1"));
        assert!(request.headers().get("Prefer").is_none());
    }

    #[test]
    fn error_bodies_map_onto_variants() {
        let err = error_from_body(
            409,
            r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#,
        );
        assert!(matches!(err, BackendError::Conflict(_)));

        let err = error_from_body(404, r#"{"code":"42P01","message":"relation \"walks\" does not exist"}"#);
        assert!(matches!(
            err,
            BackendError::MissingSchema { object: SchemaObject::Relation, .. }
        ));

        let err = error_from_body(400, r#"{"error_description":"Invalid login credentials"}"#);
        assert_eq!(err.user_message(), "Invalid email or password.");

        let err = error_from_body(502, "<html>bad gateway</html>");
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(502));

        let err = error_from_body(400, "");
        assert_eq!(err.user_message(), "HTTP 400");
    }

    #[test]
    fn patch_targets_matching_rows() {
        let gw = client("https://example.supabase.co");
        let query = Filter::new().eq("id", "abc").conditions;
        let request = gw
            .build_request(Method::PATCH, "feedings", &query, Some(&json!({ "notes": "ate half" })))
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.url().query(), Some("id=eq.abc"));
        assert_eq!(
            request.headers().get("Prefer").and_then(|h| h.to_str().ok()),
            Some("return=minimal")
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_retryable() {
        let gw = client("http://127.0.0.1:9");
        let err = gw.query("walks", &Filter::new()).await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");

        let err = gw
            .update("walks", json!({ "pee": false }), "id", "abc")
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
