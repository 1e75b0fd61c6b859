//! HTTP provider client.
//!
//! Talks to a REST provisioning endpoint:
//!
//! - `POST   {endpoint}/v1/projects/{project}/resources` with `{"kind","attributes"}`, returns `{"id"}`
//! - `GET    {endpoint}/v1/projects/{project}/resources/{id}`, returns `{"attributes"}`
//! - `PUT    {endpoint}/v1/projects/{project}/resources/{id}` with `{"attributes"}`
//! - `DELETE {endpoint}/v1/projects/{project}/resources/{id}`

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ProviderError, Result, RunstackError};
use crate::graph::{Attributes, ResourceKind};

use super::client::ProviderClient;

/// Longest provider message kept in an error.
const MAX_ERROR_BODY: usize = 512;

/// Provider client backed by a REST endpoint.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// `{endpoint}/v1/projects/{project}/resources`.
    collection: Url,
    /// Bearer token.
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    kind: ResourceKind,
    attributes: &'a Attributes,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    attributes: &'a Attributes,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    attributes: Attributes,
}

impl HttpProvider {
    /// Creates a client for `project_id` on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP
    /// client cannot be created.
    pub fn new(
        endpoint: &str,
        project_id: &str,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let mut collection = Url::parse(endpoint).map_err(|e| {
            RunstackError::internal(format!("Invalid provider endpoint '{endpoint}': {e}"))
        })?;
        collection
            .path_segments_mut()
            .map_err(|()| {
                RunstackError::internal(format!("Provider endpoint '{endpoint}' cannot be a base URL"))
            })?
            .pop_if_empty()
            .extend(["v1", "projects", project_id, "resources"]);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            collection,
            token,
        })
    }

    /// URL of a single resource.
    fn resource_url(&self, remote_id: &str) -> Url {
        let mut url = self.collection.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(remote_id);
        }
        url
    }

    /// Sends a request with auth headers and maps failures to provider errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<Response, ProviderError> {
        let request = match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    message: e.to_string(),
                }
            } else {
                ProviderError::unavailable(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        trace!("Provider responded {status}");
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY)
            .collect();

        Err(error_for_status(status, retry_after, body))
    }
}

/// Maps an unsuccessful status to a provider error.
fn error_for_status(status: StatusCode, retry_after_secs: u64, body: String) -> ProviderError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    match status.as_u16() {
        429 => ProviderError::RateLimited { retry_after_secs },
        408 => ProviderError::Timeout { message },
        400 | 422 => ProviderError::Validation { message },
        401 | 403 => ProviderError::PermissionDenied { message },
        404 => ProviderError::NotFound { remote_id: message },
        409 => ProviderError::Conflict { message },
        code if code >= 500 => ProviderError::Unavailable { message },
        _ => ProviderError::InvalidResponse { message },
    }
}

#[async_trait]
impl ProviderClient for HttpProvider {
    async fn create(
        &self,
        kind: ResourceKind,
        attributes: &Attributes,
    ) -> std::result::Result<String, ProviderError> {
        debug!("POST {} ({kind})", self.collection);
        let response = self
            .send(
                self.client
                    .post(self.collection.clone())
                    .json(&CreateRequest { kind, attributes }),
            )
            .await?;

        let created: CreateResponse = response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse create response: {e}"),
        })?;
        Ok(created.id)
    }

    async fn read(&self, remote_id: &str) -> std::result::Result<Attributes, ProviderError> {
        let response = self
            .send(self.client.get(self.resource_url(remote_id)))
            .await
            .map_err(|e| with_remote_id(e, remote_id))?;

        let read: ReadResponse = response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse resource {remote_id}: {e}"),
        })?;
        Ok(read.attributes)
    }

    async fn update(
        &self,
        remote_id: &str,
        attributes: &Attributes,
    ) -> std::result::Result<(), ProviderError> {
        debug!("PUT {remote_id}");
        self.send(
            self.client
                .put(self.resource_url(remote_id))
                .json(&UpdateRequest { attributes }),
        )
        .await
        .map_err(|e| with_remote_id(e, remote_id))?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> std::result::Result<(), ProviderError> {
        debug!("DELETE {remote_id}");
        self.send(self.client.delete(self.resource_url(remote_id)))
            .await
            .map_err(|e| with_remote_id(e, remote_id))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Replaces the status text of a `NotFound` with the id that was looked up.
fn with_remote_id(error: ProviderError, remote_id: &str) -> ProviderError {
    match error {
        ProviderError::NotFound { .. } => ProviderError::not_found(remote_id),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COLLECTION: &str = "/v1/projects/acme-prod/resources";

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), "acme-prod", Some(String::from("t0k3n")), 5)
            .expect("provider")
    }

    fn attrs() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(String::from("name"), json!("db-password"));
        attrs
    }

    #[tokio::test]
    async fn test_create_posts_kind_and_attributes() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(COLLECTION))
            .and(header("Authorization", "Bearer t0k3n"))
            .and(body_json(json!({"kind": "secret", "attributes": {"name": "db-password"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "sec-123"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = provider(&server)
            .create(ResourceKind::Secret, &attrs())
            .await
            .expect("create");
        assert_eq!(id, "sec-123");
    }

    #[tokio::test]
    async fn test_read_returns_attributes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("{COLLECTION}/sec-123")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"attributes": {"name": "db-password", "etag": "x1"}})),
            )
            .mount(&server)
            .await;

        let live = provider(&server).read("sec-123").await.expect("read");
        assert_eq!(live["name"], "db-password");
        assert_eq!(live["etag"], "x1");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path(format!("{COLLECTION}/sec-123")))
            .and(body_json(json!({"attributes": {"name": "db-password"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(format!("{COLLECTION}/sec-123")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider.update("sec-123", &attrs()).await.expect("update");
        provider.delete("sec-123").await.expect("delete");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let result = provider(&server).create(ResourceKind::Secret, &attrs()).await;
        assert_eq!(result, Err(ProviderError::RateLimited { retry_after_secs: 7 }));
    }

    #[tokio::test]
    async fn test_not_found_names_remote_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = provider(&server).read("gone-1").await;
        assert_eq!(result, Err(ProviderError::not_found("gone-1")));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .update("sec-123", &attrs())
            .await
            .expect_err("should fail");
        assert!(err.is_transient());
        assert!(err.to_string().contains("maintenance"));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StatusCode::BAD_REQUEST, false),
            (StatusCode::UNPROCESSABLE_ENTITY, false),
            (StatusCode::UNAUTHORIZED, false),
            (StatusCode::FORBIDDEN, false),
            (StatusCode::CONFLICT, false),
            (StatusCode::REQUEST_TIMEOUT, true),
            (StatusCode::BAD_GATEWAY, true),
            (StatusCode::TOO_MANY_REQUESTS, true),
        ];

        for (status, transient) in cases {
            let err = error_for_status(status, 0, String::new());
            assert_eq!(err.is_transient(), transient, "{status}");
        }

        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, 0, String::new()),
            ProviderError::PermissionDenied { .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNPROCESSABLE_ENTITY, 0, String::new()),
            ProviderError::Validation { .. }
        ));
    }

    #[test]
    fn test_endpoint_path_is_joined() {
        let provider = HttpProvider::new("https://provision.example.com/api/", "acme-prod", None, 5)
            .expect("provider");
        assert_eq!(
            provider.resource_url("a/b#1").as_str(),
            "https://provision.example.com/api/v1/projects/acme-prod/resources/a%2Fb%231"
        );
    }
}
