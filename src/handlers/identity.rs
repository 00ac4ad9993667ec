use crate::errors::ApiError;
use crate::services::ShopperIdentity;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const CUSTOMER_HEADER: &str = "x-customer-id";
pub const SESSION_HEADER: &str = "x-session-id";

/// Extracts the shopper identity from request headers. An authenticated
/// customer id wins over a guest session id when both are present.
#[derive(Debug, Clone)]
pub struct Identity(pub ShopperIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(CUSTOMER_HEADER) {
            let raw = value.to_str().map_err(|_| bad_identity())?;
            let customer_id = Uuid::parse_str(raw).map_err(|_| {
                ApiError::BadRequest {
                    message: format!("{} must be a UUID", CUSTOMER_HEADER),
                    error_code: Some("invalid_identity".to_string()),
                }
            })?;
            return Ok(Identity(ShopperIdentity::Customer(customer_id)));
        }

        if let Some(value) = parts.headers.get(SESSION_HEADER) {
            let raw = value.to_str().map_err(|_| bad_identity())?;
            if !raw.trim().is_empty() {
                return Ok(Identity(ShopperIdentity::Guest(raw.trim().to_string())));
            }
        }

        Err(ApiError::BadRequest {
            message: format!(
                "Either {} or {} header is required",
                CUSTOMER_HEADER, SESSION_HEADER
            ),
            error_code: Some("identity_required".to_string()),
        })
    }
}

fn bad_identity() -> ApiError {
    ApiError::BadRequest {
        message: "Identity header is not valid UTF-8".to_string(),
        error_code: Some("invalid_identity".to_string()),
    }
}
