//! HTTP adapter for the case store API.
//!
//! One [`HttpCaseStore`] serves both ports: single cases under `/cases` and
//! multiples under `/multiples`.
//!
//! | Call | Request |
//! |---|---|
//! | `retrieve` | `GET /cases/{case_type}/{reference}?jurisdiction={jurisdiction}` |
//! | `search` | `POST /cases/{case_type}/search` with [`SearchCriteria`] |
//! | `submit_update` | `PATCH /cases/{case_type}/{reference}` with [`ChangeSet`] |
//! | `load` | `GET /multiples/{case_type}/{reference}` |
//! | `allocate_reference` | `POST /multiples/{case_type}/references` |
//! | `commit` | `PUT /multiples/{case_type}/{reference}` with `If-Match` / `If-None-Match` |
//!
//! The multiple version travels as a quoted `ETag`; a `412` answer to a commit
//! is a concurrent modification.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{ETAG, HeaderMap, IF_MATCH, IF_NONE_MATCH};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::{
    CaseStoreClient, CaseStoreError, MultipleStore, MultipleStoreError, SearchCriteria,
};
use crate::domain::{CaseReference, ChangeSet, MultipleCase, MultipleReference, SingleCase};

/// Case store client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCaseStore {
    client: reqwest::Client,
    base_url: Arc<str>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AllocatedReference {
    reference: MultipleReference,
}

impl HttpCaseStore {
    /// Creates an adapter for the API at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Arc::from(base_url.trim_end_matches('/')),
            timeout,
        }
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn case_url(&self, case_type_id: &str, case_reference: &CaseReference) -> String {
        format!("{}/cases/{case_type_id}/{case_reference}", self.base_url)
    }

    fn multiple_url(&self, case_type_id: &str, reference: &MultipleReference) -> String {
        format!("{}/multiples/{case_type_id}/{reference}", self.base_url)
    }

    #[allow(clippy::cast_possible_truncation)] // Timeout in ms will not exceed u64
    const fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

// =============================================================================
// Case Store
// =============================================================================

impl CaseStoreClient for HttpCaseStore {
    fn retrieve(
        &self,
        case_type_id: &str,
        jurisdiction: &str,
        case_reference: &CaseReference,
    ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>> {
        let request = self
            .client
            .get(format!(
                "{}?jurisdiction={jurisdiction}",
                self.case_url(case_type_id, case_reference)
            ))
            .timeout(self.timeout);
        let timeout_ms = self.timeout_ms();
        let case_reference = case_reference.clone();

        async move {
            let response = send_case_request(request, timeout_ms).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(CaseStoreError::NotFound(case_reference.to_string()));
            }
            decode_case_response(response).await
        }
        .boxed()
    }

    fn search(
        &self,
        case_type_id: &str,
        criteria: &SearchCriteria,
    ) -> BoxFuture<'static, Result<Vec<SingleCase>, CaseStoreError>> {
        let request = self
            .client
            .post(format!("{}/cases/{case_type_id}/search", self.base_url))
            .timeout(self.timeout)
            .json(criteria);
        let timeout_ms = self.timeout_ms();

        async move {
            let response = send_case_request(request, timeout_ms).await?;
            decode_case_response(response).await
        }
        .boxed()
    }

    fn submit_update(
        &self,
        case_type_id: &str,
        case_reference: &CaseReference,
        change_set: &ChangeSet,
    ) -> BoxFuture<'static, Result<SingleCase, CaseStoreError>> {
        let request = self
            .client
            .patch(self.case_url(case_type_id, case_reference))
            .timeout(self.timeout)
            .json(change_set);
        let timeout_ms = self.timeout_ms();
        let case_reference = case_reference.clone();

        async move {
            let response = send_case_request(request, timeout_ms).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(CaseStoreError::NotFound(case_reference.to_string()));
            }
            decode_case_response(response).await
        }
        .boxed()
    }
}

async fn send_case_request(
    request: RequestBuilder,
    timeout_ms: u64,
) -> Result<Response, CaseStoreError> {
    request.send().await.map_err(|error| {
        if error.is_timeout() {
            CaseStoreError::Timeout(timeout_ms)
        } else {
            CaseStoreError::Transport(error.to_string())
        }
    })
}

async fn decode_case_response<T: DeserializeOwned>(
    response: Response,
) -> Result<T, CaseStoreError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|error| CaseStoreError::Serialization(error.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(case_status_error(status, body))
}

/// Maps a non-success answer to a case store error.
fn case_status_error(status: StatusCode, body: String) -> CaseStoreError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    match status {
        StatusCode::NOT_FOUND => CaseStoreError::NotFound(detail),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            CaseStoreError::Conflict(detail)
        }
        _ => CaseStoreError::Transport(detail),
    }
}

// =============================================================================
// Multiple Store
// =============================================================================

impl MultipleStore for HttpCaseStore {
    fn load(
        &self,
        case_type_id: &str,
        reference: &MultipleReference,
    ) -> BoxFuture<'static, Result<Option<MultipleCase>, MultipleStoreError>> {
        let request = self
            .client
            .get(self.multiple_url(case_type_id, reference))
            .timeout(self.timeout);

        async move {
            let response = send_multiple_request(request).await?;
            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(MultipleStoreError::Transport(format!("HTTP {status}")));
            }
            let version = etag_version(response.headers());
            let multiple: MultipleCase = response
                .json()
                .await
                .map_err(|error| MultipleStoreError::Serialization(error.to_string()))?;
            Ok(Some(match version {
                Some(version) => multiple.with_version(version),
                None => multiple,
            }))
        }
        .boxed()
    }

    fn allocate_reference(
        &self,
        case_type_id: &str,
    ) -> BoxFuture<'static, Result<MultipleReference, MultipleStoreError>> {
        let request = self
            .client
            .post(format!("{}/multiples/{case_type_id}/references", self.base_url))
            .timeout(self.timeout);

        async move {
            let response = send_multiple_request(request).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(MultipleStoreError::Transport(format!("HTTP {status}")));
            }
            let allocated: AllocatedReference = response
                .json()
                .await
                .map_err(|error| MultipleStoreError::Serialization(error.to_string()))?;
            Ok(allocated.reference)
        }
        .boxed()
    }

    fn commit(
        &self,
        case_type_id: &str,
        multiple: &MultipleCase,
        expected_version: Option<u64>,
    ) -> BoxFuture<'static, Result<MultipleCase, MultipleStoreError>> {
        let Some(reference) = multiple.reference().cloned() else {
            return futures::future::ready(Err(MultipleStoreError::MissingReference)).boxed();
        };
        let request = self
            .client
            .put(self.multiple_url(case_type_id, &reference))
            .timeout(self.timeout)
            .json(multiple);
        let request = match expected_version {
            Some(version) => request.header(IF_MATCH, format!("\"{version}\"")),
            None => request.header(IF_NONE_MATCH, "*"),
        };
        let committed = multiple.clone();

        async move {
            let response = send_multiple_request(request).await?;
            let status = response.status();
            if status == StatusCode::PRECONDITION_FAILED || status == StatusCode::CONFLICT {
                return Err(MultipleStoreError::ConcurrentModification {
                    reference: reference.to_string(),
                    expected: expected_version,
                    actual: etag_version(response.headers()),
                });
            }
            if !status.is_success() {
                return Err(MultipleStoreError::Transport(format!("HTTP {status}")));
            }
            let version = etag_version(response.headers())
                .unwrap_or_else(|| expected_version.map_or(1, |version| version + 1));
            Ok(committed.with_version(version))
        }
        .boxed()
    }
}

async fn send_multiple_request(request: RequestBuilder) -> Result<Response, MultipleStoreError> {
    request
        .send()
        .await
        .map_err(|error| MultipleStoreError::Transport(error.to_string()))
}

/// Reads a version from an `ETag` such as `"7"` or `W/"7"`.
fn etag_version(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(ETAG)?.to_str().ok()?;
    value
        .trim_start_matches("W/")
        .trim_matches('"')
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::HeaderValue;
    use axum::routing::{get, put};
    use rstest::rstest;

    fn reference(value: &str) -> CaseReference {
        CaseReference::new(value).unwrap()
    }

    /// Serves `router` on an ephemeral port and returns its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{address}")
    }

    // =========================================================================
    // Pure Helpers
    // =========================================================================

    #[rstest]
    #[case("\"7\"", Some(7))]
    #[case("W/\"12\"", Some(12))]
    #[case("\"abc\"", None)]
    fn etag_version_parses_quoted_numbers(#[case] etag: &str, #[case] expected: Option<u64>) {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, HeaderValue::from_str(etag).unwrap());
        assert_eq!(etag_version(&headers), expected);
    }

    #[rstest]
    #[case(StatusCode::NOT_FOUND, "NotFound")]
    #[case(StatusCode::CONFLICT, "Conflict")]
    #[case(StatusCode::UNPROCESSABLE_ENTITY, "Conflict")]
    #[case(StatusCode::BAD_GATEWAY, "Transport")]
    fn status_errors(#[case] status: StatusCode, #[case] variant: &str) {
        let error = case_status_error(status, String::new());
        let actual = match error {
            CaseStoreError::NotFound(_) => "NotFound",
            CaseStoreError::Conflict(_) => "Conflict",
            CaseStoreError::Transport(_) => "Transport",
            CaseStoreError::Timeout(_) | CaseStoreError::Serialization(_) => "other",
        };
        assert_eq!(actual, variant);
    }

    #[rstest]
    fn base_url_drops_trailing_slash() {
        let store = HttpCaseStore::new("http://cases.local/", Duration::from_secs(1));
        assert_eq!(store.base_url(), "http://cases.local");
        assert_eq!(
            store.case_url("ET", &reference("A")),
            "http://cases.local/cases/ET/A"
        );
    }

    // =========================================================================
    // Against a Local Server
    // =========================================================================

    #[rstest]
    #[tokio::test]
    async fn retrieve_decodes_case() {
        let router = Router::new().route(
            "/cases/{case_type}/{reference}",
            get(|| async { Json(SingleCase::new(CaseReference::new("A").unwrap())) }),
        );
        let store = HttpCaseStore::new(&serve(router).await, Duration::from_secs(5));

        let case = store.retrieve("ET", "EMPLOYMENT", &reference("A")).await.unwrap();

        assert_eq!(case.case_reference, reference("A"));
    }

    #[rstest]
    #[tokio::test]
    async fn retrieve_missing_case_is_not_found() {
        let store = HttpCaseStore::new(&serve(Router::new()).await, Duration::from_secs(5));

        let result = store.retrieve("ET", "EMPLOYMENT", &reference("A")).await;

        assert_eq!(result, Err(CaseStoreError::NotFound("A".to_string())));
    }

    #[rstest]
    #[tokio::test]
    async fn rejected_commit_is_concurrent_modification() {
        let router = Router::new().route(
            "/multiples/{case_type}/{reference}",
            put(|| async { (StatusCode::PRECONDITION_FAILED, [(ETAG, "\"4\"")]) }),
        );
        let store = HttpCaseStore::new(&serve(router).await, Duration::from_secs(5));
        let multiple = MultipleCase::new("Acme")
            .with_reference(MultipleReference::new("6000001").unwrap());

        let result = store.commit("ET", &multiple, Some(3)).await;

        assert_eq!(
            result,
            Err(MultipleStoreError::ConcurrentModification {
                reference: "6000001".to_string(),
                expected: Some(3),
                actual: Some(4),
            })
        );
    }

    #[rstest]
    #[tokio::test]
    async fn successful_commit_takes_version_from_etag() {
        let router = Router::new().route(
            "/multiples/{case_type}/{reference}",
            put(|| async { (StatusCode::OK, [(ETAG, "\"2\"")]) }),
        );
        let store = HttpCaseStore::new(&serve(router).await, Duration::from_secs(5));
        let multiple = MultipleCase::new("Acme")
            .with_reference(MultipleReference::new("6000001").unwrap());

        let committed = store.commit("ET", &multiple, Some(1)).await.unwrap();

        assert_eq!(committed.version(), Some(2));
    }

    #[rstest]
    #[tokio::test]
    async fn unreachable_store_is_retryable() {
        let store = HttpCaseStore::new("http://127.0.0.1:1", Duration::from_secs(5));

        let error = store
            .submit_update("ET", &reference("A"), &ChangeSet::detach(MultipleReference::new("6000001").unwrap()))
            .await
            .unwrap_err();

        assert!(error.is_retryable());
    }
}
