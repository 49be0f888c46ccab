//! HTTP calls that carry session cookies and recover once from an expired access token.
//!
//! [`AuthenticatedRequestClient`] owns the retry protocol; [`HttpTransport`] is the network seam
//! (reqwest in production, scripted in tests).

mod client;
mod request;
mod transport;

pub use client::{AuthenticatedRequestClient, RequestError};
pub use request::{
    Credentials, HttpRequest, HttpResponse, MultipartPart, RequestBody, RequestOptions,
};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
