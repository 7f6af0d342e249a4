//! Firestore REST `runQuery` client.
//!
//! Series documents live at `crypto_prices/{coin}/{subcollection}/{id}` and
//! carry their timestamp as an ISO-8601 string field named `time`, so range
//! filters compare strings in the same fixed-width format.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Number, Value};
use std::time::Duration;

use crate::config;
use crate::error::{MirrorError, Result};
use crate::query::{canonical_time, Direction, SeriesQuery, TimeBound};
use crate::source::DocumentSource;

pub struct FirestoreSource {
    client: Client,
    base_url: String,
    project_id: String,
    database: String,
    api_key: Option<String>,
    bearer_token: Option<String>,
}

impl FirestoreSource {
    /// Create a client for `project_id`'s default database.
    pub fn new(project_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config::FIRESTORE_BASE.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            api_key: None,
            bearer_token: None,
        })
    }

    /// Point at a different endpoint (emulator, proxy).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Web API key, sent as the `key` query parameter.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// OAuth / ID token, sent as a bearer `Authorization` header.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// `runQuery` URL for the coin document that parents the collection.
    pub fn run_query_url(&self, query: &SeriesQuery) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents/{}:runQuery",
            self.base_url,
            self.project_id,
            self.database,
            query.parent_path()
        )
    }

    /// Request body for `query`.
    pub fn structured_query(query: &SeriesQuery) -> Value {
        let field = json!({ "fieldPath": config::TIME_FIELD });
        let direction = match query.direction() {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };

        let mut structured = Map::new();
        structured.insert(
            "from".into(),
            json!([{ "collectionId": query.collection() }]),
        );

        if let Some(bound) = query.bound() {
            let op = match bound {
                TimeBound::After(_) => "GREATER_THAN",
                TimeBound::AtOrAfter(_) => "GREATER_THAN_OR_EQUAL",
            };
            structured.insert(
                "where".into(),
                json!({
                    "fieldFilter": {
                        "field": field,
                        "op": op,
                        "value": { "stringValue": canonical_time(bound.instant()) },
                    }
                }),
            );
        }

        structured.insert(
            "orderBy".into(),
            json!([{ "field": field, "direction": direction }]),
        );

        if let Some(n) = query.limit_value() {
            structured.insert("limit".into(), json!(n));
        }

        json!({ "structuredQuery": Value::Object(structured) })
    }
}

#[async_trait]
impl DocumentSource for FirestoreSource {
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<Value>> {
        let url = self.run_query_url(query);
        let mut request = self.client.post(&url).json(&Self::structured_query(query));
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(collection = %query.collection_path(), "firestore runQuery");
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MirrorError::RemoteFetch(format!(
                "query on {} failed with {}: {}",
                query.collection_path(),
                status,
                body.trim()
            )));
        }

        let results: Vec<Value> = resp.json().await?;
        Ok(decode_run_query(&results))
    }
}

/// Pull plain documents out of a `runQuery` response stream.
///
/// Entries without a `document` (progress or read-time markers) are skipped.
pub fn decode_run_query(results: &[Value]) -> Vec<Value> {
    results
        .iter()
        .filter_map(|entry| entry.get("document"))
        .map(|doc| match doc.get("fields") {
            Some(Value::Object(fields)) => decode_fields(fields),
            _ => Value::Object(Map::new()),
        })
        .collect()
}

fn decode_fields(fields: &Map<String, Value>) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, typed)| (name.clone(), decode_value(typed)))
            .collect(),
    )
}

/// Convert one typed Firestore value to plain JSON.
pub fn decode_value(typed: &Value) -> Value {
    let Some(obj) = typed.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" => inner.clone(),
        "booleanValue" => inner.clone(),
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        // 64-bit integers travel as strings.
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| inner.as_i64())
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::Null),
        "mapValue" => match inner.get("fields") {
            Some(Value::Object(fields)) => decode_fields(fields),
            _ => Value::Object(Map::new()),
        },
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}
