//! Typed REST calls on top of [`AuthenticatedRequestClient`].

mod auth;
mod messages;

pub use auth::{AuthApi, LoginResponse};
pub use messages::{MessagesApi, SendReceipt};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::http::{HttpResponse, RequestError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    /// The backend answered but refused the operation (e.g. wrong password).
    #[error("{0}")]
    Rejected(String),
}

fn ensure_success(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: response.status,
            body: response.text(),
        })
    }
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ApiError> {
    let response = ensure_success(response)?;
    response
        .json()
        .map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Route-table transport for API tests.

    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::config::{AuthConfig, ServerConfig};
    use crate::http::{
        AuthenticatedRequestClient, HttpRequest, HttpResponse, HttpTransport, TransportError,
    };

    #[derive(Default)]
    pub struct Routes {
        routes: Mutex<HashMap<(Method, String), (StatusCode, String)>>,
        pub seen: Mutex<Vec<HttpRequest>>,
    }

    impl Routes {
        pub fn on(self: &Arc<Self>, method: Method, path: &str, status: u16, body: &str) {
            self.routes.lock().unwrap().insert(
                (method, format!("http://localhost:8080/{}", path)),
                (StatusCode::from_u16(status).unwrap(), body.to_string()),
            );
        }

        pub fn client(self: &Arc<Self>) -> AuthenticatedRequestClient {
            AuthenticatedRequestClient::new(
                self.clone(),
                &ServerConfig::default(),
                AuthConfig::default(),
            )
        }
    }

    #[async_trait]
    impl HttpTransport for Routes {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let key = (request.method.clone(), request.url.clone());
            self.seen.lock().unwrap().push(request);
            match self.routes.lock().unwrap().get(&key) {
                Some((status, body)) => Ok(HttpResponse::new(*status, body.clone())),
                None => Err(TransportError(format!("no route for {} {}", key.0, key.1))),
            }
        }
    }
}
