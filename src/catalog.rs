use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::CatalogSettings;
use crate::domain::{FilenameStem, ImageRef, ProbeCandidate, SearchDocument, SearchResultSet};
use crate::error::LocatorError;

pub const INFO_SUFFIX: &str = "info.json";
const PREVIEW_SUFFIX: &str = "full/1024,/0/default.jpg";
const COLLECTION_FIELD: &str = "collectionId";
const SEARCH_FIELDS: [&str; 3] = ["title", "description", "images.fileName"];

/// Raw outcome of a single catalog request. Non-2xx statuses are not errors here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub url: String,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub text: String,
    pub collections: Vec<String>,
    pub size: usize,
    pub preference: String,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            collections: Vec::new(),
            size: 50,
            preference: "plan-locator".to_string(),
        }
    }
}

pub trait CatalogClient: Send + Sync {
    /// One probe request for `candidate`. Transport problems are `Err`,
    /// any HTTP status is `Ok`.
    fn probe(
        &self,
        source: &str,
        stem: &FilenameStem,
        candidate: &ProbeCandidate,
    ) -> Result<ProbeResponse, LocatorError>;
    fn fetch_descriptor(&self, image: &ImageRef) -> Result<ProbeResponse, LocatorError>;
    fn search(&self, query: &SearchQuery) -> Result<SearchResultSet, LocatorError>;
}

#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
    prefix: String,
    search_url: Option<String>,
}

impl HttpCatalogClient {
    pub fn new(settings: &CatalogSettings) -> Result<Self, LocatorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("plan-locator/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| LocatorError::TransportFailure(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|err| LocatorError::TransportFailure(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            prefix: settings.identifier_prefix.clone(),
            search_url: settings.search_url.clone(),
        })
    }

    fn get(&self, url: String) -> Result<ProbeResponse, LocatorError> {
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| LocatorError::TransportFailure(format!("{url}: {err}")))?;
        read_response(url, response)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, LocatorError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(LocatorError::TransportFailure(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for HttpCatalogClient {
    // Single shot: a timed out probe is simply "no match" for that id.
    fn probe(
        &self,
        source: &str,
        stem: &FilenameStem,
        candidate: &ProbeCandidate,
    ) -> Result<ProbeResponse, LocatorError> {
        let identifier = probe_identifier(&self.prefix, source, candidate, stem);
        self.get(info_url(&self.base_url, &identifier))
    }

    fn fetch_descriptor(&self, image: &ImageRef) -> Result<ProbeResponse, LocatorError> {
        let url = info_url(&self.base_url, &image.identifier());
        let response = self.send_with_retries(|| self.client.get(&url))?;
        read_response(url, response)
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchResultSet, LocatorError> {
        let url = self.search_url.as_deref().ok_or_else(|| {
            LocatorError::TransportFailure("catalog search endpoint is not configured".to_string())
        })?;
        let body = search_body(query);
        let response = self.send_with_retries(|| {
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(body.clone())
        })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog search failed".to_string());
            return Err(LocatorError::CatalogStatus { status, message });
        }
        let value: Value = response
            .json()
            .map_err(|err| LocatorError::MalformedSearchResponse(err.to_string()))?;
        parse_search_response(&value)
    }
}

fn read_response(
    url: String,
    response: reqwest::blocking::Response,
) -> Result<ProbeResponse, LocatorError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .map_err(|err| LocatorError::TransportFailure(format!("{url}: {err}")))?;
    Ok(ProbeResponse { status, url, body })
}

/// Remote identifier `prefix/source/bucket/id/stem.jp2`, still unencoded.
pub fn probe_identifier(
    prefix: &str,
    source: &str,
    candidate: &ProbeCandidate,
    stem: &FilenameStem,
) -> String {
    format!(
        "{prefix}/{source}/{}/{}/{}.jp2",
        candidate.range_bucket, candidate.id, stem
    )
}

/// The whole identifier becomes one opaque path segment.
pub fn info_url(base_url: &str, identifier: &str) -> String {
    format!(
        "{}/{}/{INFO_SUFFIX}",
        base_url.trim_end_matches('/'),
        encode_segment(identifier)
    )
}

pub fn preview_url(info_url: &str) -> String {
    match info_url.strip_suffix(INFO_SUFFIX) {
        Some(base) => format!("{base}{PREVIEW_SUFFIX}"),
        None => info_url.to_string(),
    }
}

pub fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        let ch = *byte as char;
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~') {
            out.push(ch);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Two-line NDJSON body: preference line, then the query line.
pub fn search_body(query: &SearchQuery) -> String {
    let preference = json!({ "preference": query.preference });
    let should = json!([
        {
            "multi_match": {
                "query": query.text,
                "type": "best_fields",
                "fields": SEARCH_FIELDS,
            }
        },
        {
            "multi_match": {
                "query": query.text,
                "type": "phrase_prefix",
                "fields": SEARCH_FIELDS,
            }
        }
    ]);
    let mut bool_query = json!({
        "must": [{ "bool": { "should": should, "minimum_should_match": 1 } }]
    });
    if !query.collections.is_empty() {
        bool_query["filter"] = json!([{ "terms": { COLLECTION_FIELD: query.collections } }]);
    }
    let body = json!({
        "query": { "bool": bool_query },
        "size": query.size,
    });
    format!("{preference}\n{body}\n")
}

pub fn parse_search_response(value: &Value) -> Result<SearchResultSet, LocatorError> {
    let hits = value
        .get("responses")
        .and_then(|value| value.as_array())
        .and_then(|responses| responses.first())
        .and_then(|value| value.get("hits"))
        .and_then(|value| value.get("hits"))
        .and_then(|value| value.as_array())
        .ok_or_else(|| {
            LocatorError::MalformedSearchResponse("missing responses[0].hits.hits".to_string())
        })?;

    let mut documents = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(id) = hit.get("_id").and_then(id_as_string) else {
            continue;
        };
        let source = hit.get("_source");
        let images = source
            .and_then(|value| value.get("images"))
            .and_then(|value| value.as_array())
            .map(|images| {
                images
                    .iter()
                    .filter_map(|image| serde_json::from_value::<ImageRef>(image.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        documents.push(SearchDocument {
            id,
            collection_id: source
                .and_then(|value| value.get(COLLECTION_FIELD))
                .and_then(id_as_string),
            title: source
                .and_then(|value| value.get("title"))
                .and_then(|value| value.as_str())
                .map(|value| value.to_string()),
            images,
        });
    }
    Ok(SearchResultSet::new(documents))
}

fn id_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
