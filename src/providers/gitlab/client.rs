use std::sync::Arc;
use std::time::Duration;

use log::warn;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Semaphore;
use url::Url;

use crate::error::{HostError, HostResult};
use crate::models::ProxyConfiguration;

const MAX_CONCURRENT_REQUESTS: usize = 32;
pub(super) const PAGE_SIZE: usize = 100;

/// Retry behaviour for rate limits, server errors and connection failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

pub struct GitLabClient {
    client: Client,
    api_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
}

impl GitLabClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        proxy: Option<&ProxyConfiguration>,
        retry: RetryPolicy,
    ) -> HostResult<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            "octane-ci-bridge/",
            env!("CARGO_PKG_VERSION")
        ));

        if let Some(proxy) = proxy {
            let mut reqwest_proxy = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))
                .map_err(|e| HostError::Config(format!("Invalid proxy: {e}")))?;
            if let Some(username) = &proxy.username {
                reqwest_proxy =
                    reqwest_proxy.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(reqwest_proxy);
        }

        let client = builder
            .build()
            .map_err(|e| HostError::Config(format!("Failed to create HTTP client: {e}")))?;

        // A base URL without a trailing slash would lose its last segment on join.
        let mut base = Url::parse(base_url)
            .map_err(|e| HostError::Config(format!("Invalid base URL: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let api_url = base
            .join("api/v4/")
            .map_err(|e| HostError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            retry,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }

    /// Path segment for a project id or full path, URL-encoded.
    pub fn project_path(project: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(project.as_bytes()).collect();
        format!("projects/{encoded}")
    }

    fn url(&self, path: &str) -> HostResult<Url> {
        self.api_url
            .join(path)
            .map_err(|e| HostError::Config(format!("Invalid API path {path}: {e}")))
    }

    fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request.header("PRIVATE-TOKEN", token)
        } else {
            request
        }
    }

    pub async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> HostResult<T>
    where
        T: DeserializeOwned,
    {
        let request = self.client.get(self.url(path)?).query(query);
        let response = self.execute(request, true).await?;
        Self::parse(response).await
    }

    /// Follows `page` until a short page, for list endpoints.
    pub async fn get_all_pages<T>(&self, path: &str, query: &[(&str, String)]) -> HostResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        for page in 1.. {
            let mut paged = query.to_vec();
            paged.push(("per_page", PAGE_SIZE.to_string()));
            paged.push(("page", page.to_string()));

            let batch: Vec<T> = self.get(path, &paged).await?;
            let last = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if last {
                break;
            }
        }

        Ok(items)
    }

    /// Like [`GitLabClient::get`] but maps 404 to `None`.
    pub async fn get_optional<T>(&self, path: &str, query: &[(&str, String)]) -> HostResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let request = self.client.get(self.url(path)?).query(query);
        let response = self.execute(request, true).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse(response).await.map(Some)
    }

    /// Sends a POST once. Only connection failures, where nothing reached
    /// the server, are retried.
    pub async fn post<T>(&self, path: &str, body: &impl Serialize) -> HostResult<T>
    where
        T: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)?).json(body);
        let response = self.execute(request, false).await?;
        Self::parse(response).await
    }

    async fn parse<T>(response: Response) -> HostResult<T>
    where
        T: DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(HostError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Sends a request, retrying on network errors and rate limits.
    ///
    /// Requests that are not `idempotent` are retried on connection errors
    /// only. Their error responses are returned as they are.
    async fn execute(&self, request: RequestBuilder, idempotent: bool) -> HostResult<Response> {
        // One permit per logical request, held across retries
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| HostError::Unavailable("GitLab client is shut down".to_string()))?;

        let mut retry_count = 0;
        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| HostError::Unavailable("Request cannot be retried".to_string()))?;

            let response = match self.auth_request(attempt).send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || (idempotent && e.is_timeout()) => {
                    if retry_count >= self.retry.max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({e}), retrying in {:?} ({}/{})...",
                        self.retry.delay,
                        retry_count + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if idempotent && retryable {
                if retry_count >= self.retry.max_retries {
                    return Err(HostError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.retry.max_retries,
                    });
                }

                warn!(
                    "GitLab API error (status {status}). Waiting {:?} before retry {}/{}...",
                    self.retry.delay,
                    retry_count + 1,
                    self.retry.max_retries
                );

                tokio::time::sleep(self.retry.delay).await;
                retry_count += 1;
                continue;
            }

            return Ok(response);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_project_path_is_encoded() {
        assert_eq!(GitLabClient::project_path("group/app"), "projects/group%2Fapp");
        assert_eq!(GitLabClient::project_path("42"), "projects/42");
    }

    #[test]
    fn test_base_url_with_subpath_keeps_prefix() {
        let client =
            GitLabClient::new("https://example.com/gitlab", None, None, no_retry()).unwrap();
        assert_eq!(client.api_url.as_str(), "https://example.com/gitlab/api/v4/");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            GitLabClient::new("not a url", None, None, no_retry()),
            Err(HostError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_get_sends_private_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/version")
            .match_header("PRIVATE-TOKEN", "glpat-test")
            .with_status(200)
            .with_body(r#"{"version":"16.11.0","revision":"abc"}"#)
            .create_async()
            .await;

        let client =
            GitLabClient::new(&server.url(), Some("glpat-test".to_string()), None, no_retry())
                .unwrap();
        let version: super::super::types::GitLabVersion = client.get("version", &[]).await.unwrap();

        assert_eq!(version.version, "16.11.0");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_optional_maps_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fmissing")
            .with_status(404)
            .with_body(r#"{"message":"404 Project Not Found"}"#)
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), None, None, no_retry()).unwrap();
        let project: Option<serde_json::Value> = client
            .get_optional(&GitLabClient::project_path("group/missing"), &[])
            .await
            .unwrap();

        assert!(project.is_none());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let retry = RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        };
        let client = GitLabClient::new(&server.url(), None, None, retry).unwrap();
        let err = client
            .get::<serde_json::Value>("projects", &[("page", "1".to_string())])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HostError::ApiErrorAfterRetries {
                status: 503,
                retries: 2
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/version")
            .with_status(401)
            .with_body("unauthorized")
            .expect(1)
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), None, None, no_retry()).unwrap();
        let err = client.get::<serde_json::Value>("version", &[]).await.unwrap_err();

        assert!(matches!(err, HostError::Api { status: 401, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_is_not_retried_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v4/projects/7/pipeline")
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;

        let retry = RetryPolicy {
            max_retries: 2,
            delay: Duration::ZERO,
        };
        let client = GitLabClient::new(&server.url(), None, None, retry).unwrap();
        let err = client
            .post::<serde_json::Value>("projects/7/pipeline", &serde_json::json!({"ref": "main"}))
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::Api { status: 502, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_all_pages_follows_full_pages() {
        let mut server = mockito::Server::new_async().await;
        let full: Vec<u32> = (0..PAGE_SIZE as u32).collect();
        let first = server
            .mock("GET", "/api/v4/projects/7/variables")
            .match_query(Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(serde_json::to_string(&full).unwrap())
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/v4/projects/7/variables")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body("[100]")
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), None, None, no_retry()).unwrap();
        let items: Vec<u32> = client
            .get_all_pages("projects/7/variables", &[])
            .await
            .unwrap();

        assert_eq!(items.len(), PAGE_SIZE + 1);
        assert_eq!(items.last(), Some(&100));
        first.assert_async().await;
        second.assert_async().await;
    }
}
