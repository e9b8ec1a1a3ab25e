//! Actix-web extractor for API token authentication.

use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse, ResponseError};
use secrecy::{ExposeSecret, SecretString};
use std::future::{ready, Ready};

use super::ApiToken;
use crate::config::API_TOKEN_HEADER;
use crate::error::ErrorResponse;

/// Extract a secret header value, wrapping it in SecretString.
/// Returns None if the header is missing or invalid UTF-8.
fn extract_secret_header(req: &HttpRequest, header_name: &str) -> Option<SecretString> {
    req.headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(|s| SecretString::from(s.to_string()))
}

/// Authentication error for extractors.
#[derive(Debug)]
pub struct AuthError {
    message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl ResponseError for AuthError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::UNAUTHORIZED).json(ErrorResponse {
            error: "UNAUTHORIZED".to_string(),
            message: self.message.clone(),
        })
    }
}

/// Extractor that requires the `X-API-Token` header to match the configured token.
///
/// ```ignore
/// async fn protected_handler(_auth: ApiTokenAuth) -> impl Responder { ... }
/// ```
pub struct ApiTokenAuth;

impl FromRequest for ApiTokenAuth {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(expected) = req.app_data::<web::Data<ApiToken>>() else {
            return ready(Err(AuthError {
                message: "Internal configuration error".to_string(),
            }));
        };

        match extract_secret_header(req, API_TOKEN_HEADER) {
            Some(provided) if expected.verify(provided.expose_secret()) => ready(Ok(ApiTokenAuth)),
            Some(_) => ready(Err(AuthError {
                message: "Invalid API token".to_string(),
            })),
            None => ready(Err(AuthError {
                message: format!("Missing API token. Provide {} header.", API_TOKEN_HEADER),
            })),
        }
    }
}
