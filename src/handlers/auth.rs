// src/handlers/auth.rs
use std::future::{Ready, ready};

use actix_web::{FromRequest, HttpRequest, dev::Payload};
use uuid::Uuid;

use crate::errors::AtelierError;
use crate::models::Requester;

/// Set by the upstream auth layer once a session token has been verified.
pub const USER_ID_HEADER: &str = "X-User-Id";

fn requester_from(req: &HttpRequest) -> Result<Requester, AtelierError> {
    let Some(value) = req.headers().get(USER_ID_HEADER) else {
        return Ok(Requester::anonymous());
    };

    let raw = value
        .to_str()
        .map_err(|_| AtelierError::Validation(format!("{} is not valid text", USER_ID_HEADER)))?
        .trim();
    if raw.is_empty() {
        return Ok(Requester::anonymous());
    }

    Uuid::parse_str(raw)
        .map(Requester::user)
        .map_err(|_| AtelierError::Validation(format!("{} must be a UUID", USER_ID_HEADER)))
}

impl FromRequest for Requester {
    type Error = AtelierError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(requester_from(req))
    }
}
