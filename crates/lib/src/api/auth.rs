//! Login, session restore and logout.

use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::{decode, ensure_success, ApiError};
use crate::config::ServerConfig;
use crate::http::{AuthenticatedRequestClient, RequestError, RequestOptions};
use crate::session::{deserialize_roles, Role, Session, UserId};

/// Body of `POST auth/login`. `roles` is a stringified authority list on this endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub id: Option<UserId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Option<serde_json::Value>,
}

impl LoginResponse {
    fn into_session(self, login_email: &str) -> Result<Session, ApiError> {
        if self.status.as_deref() == Some("failed") {
            return Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "login failed".to_string()),
            ));
        }
        let (Some(id), Some(roles)) = (self.id, self.roles) else {
            return Err(ApiError::Decode(
                "login response is missing id or roles".to_string(),
            ));
        };
        let roles = deserialize_roles(roles).map_err(|e| ApiError::Decode(e.to_string()))?;
        let email = self.email.unwrap_or_else(|| login_email.to_string());
        Ok(Session {
            user_id: id,
            display_name: self
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| email.clone()),
            email: Some(email),
            roles,
            authenticated: true,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: UserId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_roles")]
    roles: BTreeSet<Role>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct AuthApi {
    client: AuthenticatedRequestClient,
    server: ServerConfig,
}

impl AuthApi {
    pub fn new(client: AuthenticatedRequestClient, server: ServerConfig) -> Self {
        Self { client, server }
    }

    /// Form login. Session cookies set by the response are kept by the transport.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let email = email.trim();
        let options = RequestOptions::post()
            .header("accept", "application/json")
            .form(vec![
                ("username".to_string(), email.to_string()),
                ("password".to_string(), password.to_string()),
            ]);
        let response = self
            .client
            .send_unauthenticated(&self.server.api_url("auth/login"), options)
            .await?;
        if matches!(
            response.status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let message = response
                .json::<ErrorBody>()
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| "check your email and password".to_string());
            log::warn!("login rejected for {}: {}", email, message);
            return Err(ApiError::Rejected(message));
        }
        let body: LoginResponse = decode(response)?;
        let session = body.into_session(email)?;
        log::info!("logged in as user {} ({})", session.user_id, session.display_name);
        Ok(session)
    }

    /// Current session from the server cookies, or None when there is none.
    pub async fn restore_session(&self) -> Result<Option<Session>, ApiError> {
        let response = match self
            .client
            .send(&self.server.api_url("auth/userInfo"), RequestOptions::get())
            .await
        {
            Ok(r) => r,
            Err(RequestError::Unauthorized(msg)) => {
                log::debug!("no session to restore: {}", msg);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if response.status == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let value: serde_json::Value = decode(response)?;
        let empty = match &value {
            serde_json::Value::Null => true,
            serde_json::Value::Object(m) => m.is_empty(),
            _ => false,
        };
        if empty {
            log::warn!("userInfo returned no user");
            return Ok(None);
        }
        let info: UserInfo =
            serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
        let email = info.email;
        Ok(Some(Session {
            user_id: info.id,
            display_name: info
                .name
                .or_else(|| email.clone())
                .unwrap_or_default(),
            email,
            roles: info.roles,
            authenticated: true,
        }))
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        match self
            .client
            .send(&self.server.api_url("auth/logout"), RequestOptions::post())
            .await
        {
            Ok(res) => ensure_success(res).map(|_| ()),
            Err(RequestError::Unauthorized(msg)) => {
                log::debug!("logout without a live session: {}", msg);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
