//! Authenticated fetch with a single silent refresh on credential expiry.

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use super::request::{Credentials, HttpRequest, HttpResponse, RequestBody, RequestOptions};
use super::transport::{HttpTransport, ReqwestTransport, TransportError};
use crate::config::{AuthConfig, ServerConfig};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// 401 that is not an expiry, or an expiry whose refresh failed. Caller should re-login.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// No response received.
    #[error("network error: {0}")]
    Network(String),
}

impl From<TransportError> for RequestError {
    fn from(e: TransportError) -> Self {
        RequestError::Network(e.0)
    }
}

#[derive(Debug, Deserialize)]
struct UnauthorizedBody {
    #[serde(default)]
    message: Option<String>,
}

/// Cheap to clone; all clones share the transport (and so the cookie jar).
#[derive(Clone)]
pub struct AuthenticatedRequestClient {
    transport: Arc<dyn HttpTransport>,
    refresh_url: String,
    auth: AuthConfig,
}

impl AuthenticatedRequestClient {
    pub fn new(transport: Arc<dyn HttpTransport>, server: &ServerConfig, auth: AuthConfig) -> Self {
        Self {
            transport,
            refresh_url: server.server_url(&auth.refresh_path),
            auth,
        }
    }

    /// Client over a fresh reqwest transport with its own cookie jar.
    pub fn with_reqwest(server: &ServerConfig, auth: AuthConfig) -> Result<Self, RequestError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::new(Arc::new(transport), server, auth))
    }

    fn prepare(url: &str, options: &RequestOptions, credentials: Credentials) -> HttpRequest {
        let mut headers = options.headers.clone();
        match options.body.forced_content_type() {
            Some(ct) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
            }
            None => {
                headers.remove(CONTENT_TYPE);
            }
        }
        HttpRequest {
            method: options.method.clone(),
            url: url.to_string(),
            headers,
            body: options.body.clone(),
            credentials,
        }
    }

    /// Send with credentials; on an expiry-class 401, refresh once and replay once.
    pub async fn send(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, RequestError> {
        let request = Self::prepare(url, &options, Credentials::Include);
        let response = self.transport.execute(request.clone()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let message = match response.json::<UnauthorizedBody>() {
            Ok(b) => b.message.unwrap_or_default(),
            Err(_) => {
                let text = response.text();
                log::warn!("401 from {} with unreadable body: {}", url, text);
                return Err(RequestError::Unauthorized(text));
            }
        };
        log::warn!("401 from {}: {}", url, message);
        if !self.auth.is_expiry_message(&message) {
            return Err(RequestError::Unauthorized(message));
        }

        log::debug!("credential expired, refreshing via {}", self.refresh_url);
        if !self.refresh().await {
            log::error!("session refresh failed for {}", url);
            return Err(RequestError::Unauthorized(format!(
                "session refresh failed: {}",
                message
            )));
        }
        log::debug!("refresh succeeded, replaying {} {}", request.method, url);
        Ok(self.transport.execute(request).await?)
    }

    /// Send without attaching existing credentials and without refresh. Any status is returned as-is.
    pub async fn send_unauthenticated(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, RequestError> {
        let request = Self::prepare(url, &options, Credentials::Omit);
        Ok(self.transport.execute(request).await?)
    }

    /// POST to the refresh endpoint with credentials and no body. True on 2xx.
    async fn refresh(&self) -> bool {
        let request = Self::prepare(
            &self.refresh_url,
            &RequestOptions {
                method: Method::POST,
                body: RequestBody::Empty,
                ..RequestOptions::default()
            },
            Credentials::Include,
        );
        match self.transport.execute(request).await {
            Ok(res) if res.is_success() => true,
            Ok(res) => {
                log::warn!("refresh returned {}", res.status);
                false
            }
            Err(e) => {
                log::warn!("refresh request failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::MultipartPart;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: pops one canned result per call and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        fallback: Option<HttpResponse>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn always(res: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(res),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|r| r.url.clone()).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            if let Some(r) = self.replies.lock().unwrap().pop_front() {
                return r;
            }
            match &self.fallback {
                Some(r) => Ok(r.clone()),
                None => Err(TransportError("script exhausted".into())),
            }
        }
    }

    fn expired() -> HttpResponse {
        HttpResponse::new(
            StatusCode::UNAUTHORIZED,
            r#"{"message":"액세스 토큰이 만료되었습니다."}"#,
        )
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::new(StatusCode::OK, body.to_string())
    }

    fn client(t: Arc<Scripted>) -> AuthenticatedRequestClient {
        AuthenticatedRequestClient::new(t, &ServerConfig::default(), AuthConfig::default())
    }

    const URL: &str = "http://localhost:8080/api/messages/received/1";
    const REFRESH: &str = "http://localhost:8080/refresh";

    #[tokio::test]
    async fn expired_then_ok_replays_once() {
        let t = Scripted::new(vec![Ok(expired()), Ok(ok("")), Ok(ok("[1]"))]);
        let res = client(t.clone()).send(URL, RequestOptions::get()).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.text(), "[1]");
        let urls = t.urls();
        assert_eq!(urls.iter().filter(|u| *u == URL).count(), 2);
        assert_eq!(urls.iter().filter(|u| *u == REFRESH).count(), 1);
        assert_eq!(urls, vec![URL, REFRESH, URL]);
    }

    #[tokio::test]
    async fn refresh_posts_without_body_with_credentials() {
        let t = Scripted::new(vec![Ok(expired()), Ok(ok("")), Ok(ok(""))]);
        client(t.clone()).send(URL, RequestOptions::get()).await.unwrap();
        let seen = t.seen.lock().unwrap();
        let refresh = &seen[1];
        assert_eq!(refresh.method, Method::POST);
        assert!(matches!(refresh.body, RequestBody::Empty));
        assert_eq!(refresh.credentials, Credentials::Include);
    }

    #[tokio::test]
    async fn always_expired_refreshes_exactly_once() {
        let t = Scripted::always(expired());
        let err = client(t.clone())
            .send(URL, RequestOptions::get())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Unauthorized(_)));
        assert_eq!(t.urls(), vec![URL, REFRESH]);
    }

    #[tokio::test]
    async fn replay_status_is_returned_whatever_it_is() {
        let t = Scripted::new(vec![Ok(expired()), Ok(ok("")), Ok(expired())]);
        let res = client(t.clone()).send(URL, RequestOptions::get()).await.unwrap();
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(t.urls().len(), 3);
    }

    #[tokio::test]
    async fn non_expiry_401_fails_without_refresh() {
        let bad = HttpResponse::new(
            StatusCode::UNAUTHORIZED,
            r#"{"message":"인증 토큰이 누락되었습니다."}"#,
        );
        let t = Scripted::new(vec![Ok(bad)]);
        let err = client(t.clone())
            .send(URL, RequestOptions::get())
            .await
            .unwrap_err();
        match err {
            RequestError::Unauthorized(m) => assert!(m.contains("누락")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(t.urls(), vec![URL]);
    }

    #[tokio::test]
    async fn refresh_transport_failure_is_unauthorized() {
        let t = Scripted::new(vec![Ok(expired()), Err(TransportError("reset".into()))]);
        let err = client(t).send(URL, RequestOptions::get()).await.unwrap_err();
        assert!(matches!(err, RequestError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let t = Scripted::new(vec![Err(TransportError("connection refused".into()))]);
        let err = client(t.clone())
            .send(URL, RequestOptions::get())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Network(_)));
        assert_eq!(t.urls().len(), 1);
    }

    #[tokio::test]
    async fn server_errors_pass_through() {
        let t = Scripted::new(vec![Ok(HttpResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "boom",
        ))]);
        let res = client(t).send(URL, RequestOptions::get()).await.unwrap();
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn json_content_type_is_forced_and_multipart_omits_it() {
        let t = Scripted::new(vec![Ok(ok("")), Ok(ok(""))]);
        let c = client(t.clone());
        c.send(URL, RequestOptions::post().header("Content-Type", "text/plain"))
            .await
            .unwrap();
        let parts = vec![MultipartPart::Text {
            name: "title".into(),
            value: "x".into(),
        }];
        c.send(
            URL,
            RequestOptions::post()
                .header("Content-Type", "application/json")
                .multipart(parts),
        )
        .await
        .unwrap();
        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0].headers[CONTENT_TYPE], "application/json");
        assert!(seen[1].headers.get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn unauthenticated_omits_credentials_and_never_refreshes() {
        let t = Scripted::new(vec![Ok(expired())]);
        let res = client(t.clone())
            .send_unauthenticated(URL, RequestOptions::post())
            .await
            .unwrap();
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        let seen = t.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].credentials, Credentials::Omit);
    }
}
