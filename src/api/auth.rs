use std::future::{Ready, ready};

use actix_web::{FromRequest, HttpRequest, HttpResponse, dev::Payload};

use crate::api::error::ErrorResponse;

/// Identity of the calling user, as established by the upstream auth
/// layer and forwarded in the `X-User-Id` header. This service trusts
/// the header; token verification happens in front of it.
pub struct AuthenticatedUser(pub String);

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user_id = req
            .headers()
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        ready(match user_id {
            Some(id) => Ok(AuthenticatedUser(id)),
            None => {
                let response = HttpResponse::Unauthorized().json(ErrorResponse {
                    error: "Unauthorized".to_string(),
                    fields: serde_json::json!({ "message": "Missing user identity" }),
                });
                Err(actix_web::error::InternalError::from_response("", response).into())
            }
        })
    }
}
