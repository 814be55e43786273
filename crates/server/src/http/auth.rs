#![forbid(unsafe_code)]

use super::AppState;
use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "x-signature";

const SIGNATURE_HEX_LEN: usize = 64;

/// Hex SHA-256 of `secret` followed by `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    hex::encode(digest(secret, body))
}

fn digest(secret: &str, body: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(body);
    hasher.finalize().into()
}

fn provided_signature(headers: &HeaderMap) -> Result<Vec<u8>, (StatusCode, String)> {
    let Some(raw) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return Err((
            StatusCode::BAD_REQUEST,
            "missing X-Signature header".to_string(),
        ));
    };
    let raw = raw.trim();
    if raw.len() != SIGNATURE_HEX_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            "X-Signature must be 64 hex characters".to_string(),
        ));
    }
    hex::decode(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "X-Signature must be 64 hex characters".to_string(),
        )
    })
}

fn same_bytes(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verifies the body signature before any handler parses the body.
pub(super) async fn require_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(secret) = state.secret.clone() else {
        return next.run(request).await;
    };

    let provided = match provided_signature(request.headers()) {
        Ok(provided) => provided,
        Err(rejection) => return rejection.into_response(),
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("request body rejected: {err}"),
            )
                .into_response();
        }
    };

    if !same_bytes(&provided, &digest(&secret, &bytes)) {
        warn!(path = %parts.uri.path(), "request signature mismatch");
        return (StatusCode::UNAUTHORIZED, "signature mismatch".to_string()).into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes)))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_hex_sha256_of_secret_then_body() {
        // sha256("abc")
        assert_eq!(
            sign("a", b"bc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sign("", b"abc"), sign("ab", b"c"));
    }

    #[test]
    fn header_must_be_64_hex_chars() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            provided_signature(&headers).unwrap_err().0,
            StatusCode::BAD_REQUEST
        );

        headers.insert(SIGNATURE_HEADER, "abcd".parse().expect("header"));
        assert_eq!(
            provided_signature(&headers).unwrap_err().0,
            StatusCode::BAD_REQUEST
        );

        headers.insert(SIGNATURE_HEADER, "z".repeat(64).parse().expect("header"));
        assert_eq!(
            provided_signature(&headers).unwrap_err().0,
            StatusCode::BAD_REQUEST
        );

        headers.insert(SIGNATURE_HEADER, sign("s", b"x").parse().expect("header"));
        assert_eq!(provided_signature(&headers).expect("valid").len(), 32);
    }
}
