//! HTTP transport: the seam between the retry protocol and the network.

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderValue, CONTENT_TYPE, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;

use super::request::{Credentials, HttpRequest, HttpResponse, MultipartPart, RequestBody};

/// Transport-level failure: no response was received.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// Executes one prepared request. Implementations never interpret status codes.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest transport with an in-memory cookie jar shared by both credential modes.
///
/// `Credentials::Omit` requests go through a client without a cookie provider, but cookies they
/// receive (e.g. from login) are still stored in the jar.
#[derive(Clone)]
pub struct ReqwestTransport {
    jar: Arc<Jar>,
    with_cookies: reqwest::Client,
    without_cookies: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let with_cookies = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()?;
        let without_cookies = reqwest::Client::builder().build()?;
        Ok(Self {
            jar,
            with_cookies,
            without_cookies,
        })
    }

    /// Cookie header the jar would send to `url` (for diagnostics and tests).
    pub fn cookies_for(&self, url: &str) -> Option<String> {
        let url = reqwest::Url::parse(url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }
}

fn build_form(parts: Vec<MultipartPart>) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            MultipartPart::Text { name, value } => form.text(name, value),
            MultipartPart::File {
                name,
                file_name,
                mime,
                data,
            } => {
                let mut p = Part::bytes(data).file_name(file_name);
                if let Some(m) = mime {
                    p = p.mime_str(&m)?;
                }
                form.part(name, p)
            }
        };
    }
    Ok(form)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = match request.credentials {
            Credentials::Include => &self.with_cookies,
            Credentials::Omit => &self.without_cookies,
        };
        let mut headers = request.headers;
        let builder = client.request(request.method, &request.url);
        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(v) => builder.body(v.to_string()),
            RequestBody::Text(s) => builder.body(s),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(parts) => {
                // reqwest writes its own boundary header
                headers.remove(CONTENT_TYPE);
                builder.multipart(build_form(parts)?)
            }
        };
        let res = builder.headers(headers).send().await?;
        let status = res.status();
        let headers = res.headers().clone();
        if request.credentials == Credentials::Omit {
            let url = res.url().clone();
            let mut cookies = headers.get_all(SET_COOKIE).iter();
            self.jar
                .set_cookies(&mut cookies as &mut dyn Iterator<Item = &HeaderValue>, &url);
        }
        let body = res.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
