//! Cursor-following fetch loop over a single resource collection.
//!
//! Every page is a JSON object `{"results": [...], "next": <url or null>}`.
//! The query string of `next` becomes the query of the following request
//! against the same resource URL; a null `next`, or one whose query decodes
//! to nothing, ends the collection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, Stream, TryStreamExt};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, SourceError};
use crate::telemetry::get_metrics;
use crate::token_provider::AccessToken;

/// One record of a resource collection, passed through untouched
pub type ResourceRecord = Value;

/// Query parameters decoded from a `next` URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor(BTreeMap<String, Vec<String>>);

impl PageCursor {
    /// Decode the query string of a `next` URL.
    /// Parameters with blank values are dropped.
    pub fn from_next_url(next: &str) -> Result<Self> {
        let url = Url::parse(next).map_err(|e| {
            SourceError::Parse(format!("Invalid 'next' URL '{}': {}", next, e))
        })?;

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            params
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        Ok(Self(params))
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flattened `(name, value)` pairs, repeated names kept
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
            .collect()
    }
}

/// A decoded response page
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub results: Vec<ResourceRecord>,
    pub next: Option<PageCursor>,
}

impl Page {
    /// Validate and split a response body into records and the next cursor
    pub fn from_json(body: Value) -> Result<Self> {
        let Value::Object(mut body) = body else {
            return Err(SourceError::Parse(
                "Response body is not a JSON object".to_string(),
            ));
        };

        let results = match body.remove("results") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(SourceError::Parse(format!(
                    "'results' is not a list: {}",
                    other
                )))
            }
            None => {
                return Err(SourceError::Parse(
                    "Response body missing 'results'".to_string(),
                ))
            }
        };

        let next = match body.remove("next") {
            Some(Value::Null) => None,
            // a next URL without usable parameters would re-request the first page
            Some(Value::String(url)) => {
                Some(PageCursor::from_next_url(&url)?).filter(|cursor| !cursor.is_empty())
            }
            Some(other) => {
                return Err(SourceError::Parse(format!(
                    "'next' is neither a URL nor null: {}",
                    other
                )))
            }
            None => {
                return Err(SourceError::Parse(
                    "Response body missing 'next'".to_string(),
                ))
            }
        };

        Ok(Self { results, next })
    }
}

enum Position {
    First,
    Next(PageCursor),
    Done,
}

/// Sequential page fetcher for one resource URL
pub struct Paginator {
    client: Client,
    url: String,
    token: Arc<AccessToken>,
    position: Position,
    pages: u64,
}

impl Paginator {
    pub fn new(client: Client, url: impl Into<String>, token: Arc<AccessToken>) -> Self {
        Self {
            client,
            url: url.into(),
            token,
            position: Position::First,
            pages: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token(&self) -> &Arc<AccessToken> {
        &self.token
    }

    /// Number of pages fetched so far
    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }

    /// Fetch the next page's records, `None` once the last page has been read.
    /// Any error ends the pagination.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ResourceRecord>>> {
        let cursor = match std::mem::replace(&mut self.position, Position::Done) {
            Position::Done => return Ok(None),
            Position::First => None,
            Position::Next(cursor) => Some(cursor),
        };

        let page = self.fetch(cursor.as_ref()).await?;
        self.pages += 1;

        debug!(
            url = %self.url,
            page = self.pages,
            records = page.results.len(),
            has_next = page.next.is_some(),
            "Fetched page"
        );

        match page.next {
            Some(next) => self.position = Position::Next(next),
            None => info!(url = %self.url, pages = self.pages, "Reached last page"),
        }

        if let Some(m) = get_metrics() {
            m.records_read.add(page.results.len() as u64, &[]);
        }

        Ok(Some(page.results))
    }

    async fn fetch(&self, cursor: Option<&PageCursor>) -> Result<Page> {
        let started = Instant::now();

        let mut request = self.client.get(&self.url).bearer_auth(self.token.as_str());
        if let Some(cursor) = cursor {
            request = request.query(&cursor.query_pairs());
        }

        let response = request.send().await.map_err(|e| {
            self.http_error(None, format!("Failed to send request: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.http_error(Some(status.as_u16()), format!("HTTP {}", status)));
        }

        let body: Value = response.json().await.map_err(|e| {
            SourceError::Parse(format!("Failed to parse page from {}: {}", self.url, e))
        })?;

        if let Some(m) = get_metrics() {
            m.pages_fetched.add(1, &[]);
            m.page_fetch_seconds
                .record(started.elapsed().as_secs_f64(), &[]);
        }

        Page::from_json(body)
    }

    fn http_error(&self, status: Option<u16>, detail: String) -> SourceError {
        if let Some(m) = get_metrics() {
            m.http_errors.add(1, &[]);
        }
        warn!(url = %self.url, status = ?status, "{}", detail);
        SourceError::Http {
            url: self.url.clone(),
            status,
            detail,
        }
    }

    /// Lazy sequence of every record across all pages, in server order
    pub fn records(self) -> impl Stream<Item = Result<ResourceRecord>> + Send {
        stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Ok::<_, SourceError>(page.map(|records| (records, paginator)))
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<_, SourceError>)))
        .try_flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn token() -> Arc<AccessToken> {
        Arc::new(AccessToken::new("tok"))
    }

    #[test]
    fn test_cursor_from_next_url() {
        let cursor =
            PageCursor::from_next_url("https://x/beta/assignments?cursor=2&tag=a&tag=b&empty=")
                .unwrap();

        assert_eq!(cursor.get("cursor"), Some(&["2".to_string()][..]));
        assert_eq!(
            cursor.get("tag"),
            Some(&["a".to_string(), "b".to_string()][..])
        );
        assert_eq!(cursor.get("empty"), None);
        assert_eq!(
            cursor.query_pairs(),
            vec![("cursor", "2"), ("tag", "a"), ("tag", "b")]
        );
    }

    #[test]
    fn test_cursor_rejects_relative_url() {
        assert!(matches!(
            PageCursor::from_next_url("/beta/assignments?cursor=2"),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn test_page_from_json() {
        let page = Page::from_json(json!({
            "results": [{"uuid": "a"}, {"uuid": "b"}],
            "next": "https://x/?cursor=abc%3D"
        }))
        .unwrap();

        assert_eq!(page.results.len(), 2);
        let next = page.next.unwrap();
        assert_eq!(next.get("cursor"), Some(&["abc=".to_string()][..]));
    }

    #[test]
    fn test_page_with_empty_next_query_is_last() {
        for next in ["https://x/?cursor=", "https://x/beta/projects"] {
            let page = Page::from_json(json!({"results": [{"uuid": "a"}], "next": next})).unwrap();
            assert_eq!(page.results.len(), 1);
            assert!(page.next.is_none(), "{} should end pagination", next);
        }
    }

    #[test]
    fn test_page_requires_next_key() {
        let err = Page::from_json(json!({"results": []})).unwrap_err();
        assert!(matches!(err, SourceError::Parse(ref msg) if msg.contains("next")));

        let err = Page::from_json(json!({"results": [], "next": 5})).unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[test]
    fn test_page_requires_results_list() {
        assert!(matches!(
            Page::from_json(json!({"next": null})),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(
            Page::from_json(json!({"results": {"uuid": "a"}, "next": null})),
            Err(SourceError::Parse(_))
        ));
        assert!(matches!(
            Page::from_json(json!([{"uuid": "a"}])),
            Err(SourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_single_page() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/beta/assignments")
            .match_query(Matcher::Exact(String::new()))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [{"uuid": "a"}], "next": null}"#)
            .expect(1)
            .create_async()
            .await;

        let paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/assignments", server.url()),
            token(),
        );
        let records: Vec<Value> = paginator.records().try_collect().await.unwrap();

        assert_eq!(records, vec![json!({"uuid": "a"})]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_follows_next_cursor() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/beta/employees")
            .match_query(Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "a"}], "next": "https://x/?cursor=2"}"#)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/beta/employees")
            .match_query(Matcher::Exact("cursor=2".into()))
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "b"}], "next": null}"#)
            .expect(1)
            .create_async()
            .await;

        let mut paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/employees", server.url()),
            token(),
        );

        let page = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(page, vec![json!({"uuid": "a"})]);
        let page = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(page, vec![json!({"uuid": "b"})]);
        assert!(paginator.next_page().await.unwrap().is_none());
        assert_eq!(paginator.pages_fetched(), 2);

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_records_span_pages_in_order() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/beta/projects")
            .match_query(Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(
                r#"{"results": [{"uuid": "a"}, {"uuid": "b"}], "next": "https://x/?cursor=2"}"#,
            )
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/beta/projects")
            .match_query(Matcher::Exact("cursor=2".into()))
            .with_status(200)
            .with_body(r#"{"results": [], "next": "https://x/?cursor=3"}"#)
            .create_async()
            .await;
        let _third = server
            .mock("GET", "/beta/projects")
            .match_query(Matcher::Exact("cursor=3".into()))
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "c"}], "next": null}"#)
            .create_async()
            .await;

        let paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/projects", server.url()),
            token(),
        );
        let ids: Vec<String> = paginator
            .records()
            .map_ok(|r| r["uuid"].as_str().unwrap_or_default().to_string())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_http_error_stops_iteration() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/beta/assignments")
            .match_query(Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "a"}], "next": "https://x/?cursor=2"}"#)
            .expect(1)
            .create_async()
            .await;
        let failing = server
            .mock("GET", "/beta/assignments")
            .match_query(Matcher::Exact("cursor=2".into()))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/assignments", server.url()),
            token(),
        );
        let mut records = Box::pin(paginator.records());

        let first = records.next().await.unwrap().unwrap();
        assert_eq!(first, json!({"uuid": "a"}));

        let err = records.next().await.unwrap().unwrap_err();
        assert!(matches!(err, SourceError::Http { status: Some(500), .. }));
        assert_eq!(err.status(), Some(500));

        assert!(records.next().await.is_none());
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_blank_cursor_ends_pagination() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/beta/projects")
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "a"}], "next": "https://x/beta/projects?cursor="}"#)
            .expect(1)
            .create_async()
            .await;

        let paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/projects", server.url()),
            token(),
        );
        let records: Vec<Value> = paginator.records().try_collect().await.unwrap();

        assert_eq!(records, vec![json!({"uuid": "a"})]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_repeated_cursor_keys_sent_verbatim() {
        let mut server = Server::new_async().await;
        let _first = server
            .mock("GET", "/beta/employees")
            .match_query(Matcher::Exact(String::new()))
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "a"}], "next": "https://x/?tag=a&tag=b&page=2"}"#)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/beta/employees")
            .match_query(Matcher::Exact("page=2&tag=a&tag=b".into()))
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "b"}], "next": null}"#)
            .expect(1)
            .create_async()
            .await;

        let paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/employees", server.url()),
            token(),
        );
        let records: Vec<Value> = paginator.records().try_collect().await.unwrap();

        assert_eq!(records, vec![json!({"uuid": "a"}), json!({"uuid": "b"})]);
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_next_is_parse_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/beta/employees")
            .with_status(200)
            .with_body(r#"{"results": [{"uuid": "a"}]}"#)
            .create_async()
            .await;

        let mut paginator = Paginator::new(
            Client::new(),
            format!("{}/beta/employees", server.url()),
            token(),
        );

        let err = paginator.next_page().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
        assert!(paginator.next_page().await.unwrap().is_none());
    }
}
