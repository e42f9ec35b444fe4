//! HTTP client for the backend's collection admin API, used for remote
//! inspection and bulk rule maintenance.

pub mod rules;

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Method, StatusCode, Url};
use schema_types::{Collection, RuleSet};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

pub use rules::{ApplySummary, CollectionRules, RuleBackupEntry, RulesBackend, RulesDocument};

const SUPERUSER_AUTH_PATH: &[&str] = &["api", "collections", "_superusers", "auth-with-password"];
const LEGACY_ADMIN_AUTH_PATH: &[&str] = &["api", "admins", "auth-with-password"];
const COLLECTIONS_PATH: &[&str] = &["api", "collections"];
const COLLECTIONS_PAGE_SIZE: u32 = 200;
const DEFAULT_RECORDS_PAGE_SIZE: u32 = 30;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authenticated, call auth_with_password first")]
    Unauthenticated,
    #[error("{method} {path} failed: {status} {body}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("auth response did not contain a token")]
    MissingToken,
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}

/// True when `err` wraps a 404 from the backend.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ClientError>())
        .any(ClientError::is_not_found)
}

/// A collection as the backend reports it. Fields stay raw JSON because the
/// backend knows more field types than the local schema model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCollection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub fields: Vec<Value>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(flatten)]
    pub rules: RuleSet,
}

impl RemoteCollection {
    /// Converts into the local schema model; fails on field types it does
    /// not know.
    pub fn to_collection(&self) -> Result<Collection> {
        let value = serde_json::to_value(self)?;
        serde_json::from_value(value)
            .with_context(|| format!("collection `{}` uses unsupported field options", self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page: u32,
    pub per_page: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub page: u32,
    pub per_page: u32,
    pub filter: Option<String>,
    pub sort: Option<String>,
}

pub struct BackendClient {
    client: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl BackendClient {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let raw = base_url.as_ref();
        let base_url =
            Url::parse(raw).with_context(|| format!("invalid backend url `{raw}`"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("backend url `{raw}` cannot have a path");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Appends `segments` to the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("backend url `{}` cannot have a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self, name_or_id: &str) -> Result<Url> {
        self.endpoint(&["api", "collections", name_or_id])
    }

    fn records_url(&self, collection: &str) -> Result<Url> {
        self.endpoint(&["api", "collections", collection, "records"])
    }

    /// Authenticates as a superuser, falling back to the pre-0.23 admin
    /// endpoint when the superuser collection does not exist.
    pub async fn auth_with_password(&self, identity: &str, password: &str) -> Result<()> {
        let body = json!({ "identity": identity, "password": password });
        let response = match self
            .send(Method::POST, self.endpoint(SUPERUSER_AUTH_PATH)?, &[], Some(&body), false)
            .await
        {
            Ok(response) => response,
            Err(err) if is_not_found(&err) => {
                debug!("superuser auth endpoint missing, trying legacy admin endpoint");
                let url = self.endpoint(LEGACY_ADMIN_AUTH_PATH)?;
                self.send(Method::POST, url, &[], Some(&body), false).await?
            }
            Err(err) => return Err(err.context("superuser authentication failed")),
        };

        let token = response
            .get("token")
            .and_then(Value::as_str)
            .ok_or(ClientError::MissingToken)?;
        *self.token.write() = Some(token.to_string());
        info!(url = %self.base_url(), "authenticated with backend");
        Ok(())
    }

    pub async fn get_collection(&self, name_or_id: &str) -> Result<RemoteCollection> {
        let url = self.collection_url(name_or_id)?;
        let value = self.send(Method::GET, url, &[], None, true).await?;
        serde_json::from_value(value).context("failed to parse collection")
    }

    /// Every collection, following pagination.
    pub async fn list_collections(&self) -> Result<Vec<RemoteCollection>> {
        let mut out = Vec::new();
        let mut page: u32 = 1;
        loop {
            let query = [
                ("page", page.to_string()),
                ("perPage", COLLECTIONS_PAGE_SIZE.to_string()),
            ];
            let url = self.endpoint(COLLECTIONS_PATH)?;
            let value = self.send(Method::GET, url, &query, None, true).await?;
            let batch: Page<RemoteCollection> =
                serde_json::from_value(value).context("failed to parse collection page")?;
            let done = batch.items.is_empty() || i64::from(batch.page) >= batch.total_pages;
            out.extend(batch.items);
            if done {
                break;
            }
            page += 1;
        }
        debug!(count = out.len(), "listed remote collections");
        Ok(out)
    }

    pub async fn get_records(&self, collection: &str, query: &RecordQuery) -> Result<Page<Value>> {
        let url = self.records_url(collection)?;
        let value = self
            .send(Method::GET, url, &record_params(query), None, true)
            .await?;
        serde_json::from_value(value).context("failed to parse record page")
    }

    pub async fn update_rules(&self, collection_id: &str, rules: &RuleSet) -> Result<()> {
        let body = serde_json::to_value(rules)?;
        let url = self.collection_url(collection_id)?;
        self.send(Method::PATCH, url, &[], Some(&body), true).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Value> {
        let path = url.path().to_string();
        let mut request = self.client.request(method.clone(), url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if authenticated {
            let token = self.token.read().clone().ok_or(ClientError::Unauthenticated)?;
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {path} failed to send"))?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                method,
                path,
                status,
                body: text,
            }
            .into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("{method} {path} returned invalid json"))
    }
}

fn record_params(query: &RecordQuery) -> Vec<(&'static str, String)> {
    let per_page = if query.per_page == 0 {
        DEFAULT_RECORDS_PAGE_SIZE
    } else {
        query.per_page
    };
    let mut params = vec![
        ("page", query.page.max(1).to_string()),
        ("perPage", per_page.to_string()),
    ];
    if let Some(filter) = &query.filter {
        params.push(("filter", filter.clone()));
    }
    if let Some(sort) = &query.sort {
        params.push(("sort", sort.clone()));
    }
    params
}

#[async_trait]
impl RulesBackend for BackendClient {
    async fn get_collection(&self, name_or_id: &str) -> Result<RemoteCollection> {
        BackendClient::get_collection(self, name_or_id).await
    }

    async fn list_collections(&self) -> Result<Vec<RemoteCollection>> {
        BackendClient::list_collections(self).await
    }

    async fn update_rules(&self, collection_id: &str, rules: &RuleSet) -> Result<()> {
        BackendClient::update_rules(self, collection_id, rules).await
    }
}

#[cfg(test)]
mod tests {
    use schema_types::{FieldKind, RuleKind};

    use super::*;

    #[test]
    fn builds_urls_without_double_slashes() {
        let client =
            BackendClient::new("http://127.0.0.1:8090/", Duration::from_secs(5)).expect("client");
        assert_eq!(client.base_url(), "http://127.0.0.1:8090");
        assert_eq!(
            client.endpoint(SUPERUSER_AUTH_PATH).expect("url").as_str(),
            "http://127.0.0.1:8090/api/collections/_superusers/auth-with-password"
        );
        assert!(!client.is_authenticated());

        let prefixed =
            BackendClient::new("https://school.example/pb/", Duration::from_secs(5)).expect("client");
        assert_eq!(
            prefixed.endpoint(COLLECTIONS_PATH).expect("url").as_str(),
            "https://school.example/pb/api/collections"
        );
    }

    #[test]
    fn collection_names_stay_in_one_path_segment() {
        let client =
            BackendClient::new("http://127.0.0.1:8090", Duration::from_secs(5)).expect("client");
        let url = client.records_url("wellness logs?x=1").expect("url");
        assert_eq!(url.path(), "/api/collections/wellness%20logs%3Fx=1/records");
        assert_eq!(url.query(), None);

        let url = client.collection_url("a/b").expect("url");
        assert_eq!(url.path(), "/api/collections/a%2Fb");
    }

    #[test]
    fn record_queries_encode_filters() {
        let client =
            BackendClient::new("http://127.0.0.1:8090", Duration::from_secs(5)).expect("client");
        let query = RecordQuery {
            page: 0,
            per_page: 50,
            filter: Some("user = \"u1\" && mood != ''".to_string()),
            sort: Some("-created".to_string()),
        };
        let request = client
            .client
            .get(client.records_url("wellness_logs").expect("url"))
            .query(&record_params(&query))
            .build()
            .expect("request");

        let url = request.url();
        assert!(!url.query().unwrap_or_default().contains(' '));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "1".to_string()),
                ("perPage".to_string(), "50".to_string()),
                ("filter".to_string(), "user = \"u1\" && mood != ''".to_string()),
                ("sort".to_string(), "-created".to_string()),
            ]
        );
    }

    #[test]
    fn record_queries_default_page_size() {
        let params = record_params(&RecordQuery::default());
        assert_eq!(
            params,
            vec![("page", "1".to_string()), ("perPage", "30".to_string())]
        );
    }

    #[test]
    fn parses_collection_pages_with_unknown_field_types() {
        let page: Page<RemoteCollection> = serde_json::from_value(json!({
            "page": 1,
            "perPage": 200,
            "totalItems": 1,
            "totalPages": 1,
            "items": [{
                "id": "pbc_926415452",
                "name": "wellness_logs",
                "type": "base",
                "system": false,
                "listRule": "@request.auth.id = user.id",
                "viewRule": "@request.auth.id = user.id",
                "createRule": "",
                "updateRule": "@request.auth.id = user.id",
                "deleteRule": null,
                "fields": [
                    { "id": "editor1", "name": "body", "type": "editor", "convertURLs": false },
                    { "id": "number1", "name": "steps", "type": "number", "onlyInt": true }
                ],
                "indexes": [],
                "created": "2025-12-05 10:00:00.000Z"
            }]
        }))
        .expect("page");

        let logs = &page.items[0];
        assert_eq!(logs.rules.get(RuleKind::Create), Some(""));
        assert_eq!(logs.rules.get(RuleKind::Delete), None);
        assert_eq!(logs.fields.len(), 2);
        assert!(logs.to_collection().is_err());

        let mut supported = logs.clone();
        supported.fields.remove(0);
        let collection = supported.to_collection().expect("collection");
        assert!(matches!(
            collection.fields.get_by_name("steps").map(|f| &f.kind),
            Some(FieldKind::Number(options)) if options.only_int
        ));
    }

    #[tokio::test]
    async fn authenticated_calls_require_a_token() {
        let client =
            BackendClient::new("http://127.0.0.1:9", Duration::from_secs(1)).expect("client");
        let err = client.list_collections().await.expect_err("no token");
        assert!(matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::Unauthenticated)
        ));
    }

    #[test]
    fn not_found_is_detected_through_context() {
        let err = anyhow::Error::from(ClientError::Status {
            method: Method::GET,
            path: "/api/collections/legacy".to_string(),
            status: StatusCode::NOT_FOUND,
            body: "{}".to_string(),
        })
        .context("lookup failed");
        assert!(is_not_found(&err));
    }
}
