use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};

use crate::error::{ArenaError, Result};

pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

/// Check the trigger bearer token against the expected fingerprint.
///
/// Fingerprints are compared rather than raw tokens, so the comparison time
/// does not depend on how much of the secret matched.
pub fn ensure_trigger_authorized(headers: &HeaderMap, expected_fp: Option<&str>) -> Result<()> {
    let Some(expected_fp) = expected_fp else {
        return Err(ArenaError::Unauthorized(
            "session trigger is disabled: no trigger token configured".to_string(),
        ));
    };

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ArenaError::Unauthorized("missing bearer token".to_string()))?;

    if token_fingerprint(token) == expected_fp {
        Ok(())
    } else {
        Err(ArenaError::Unauthorized("invalid bearer token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_bearer_token_matches_fingerprint() {
        let fp = token_fingerprint("s3cret");
        assert!(ensure_trigger_authorized(&headers("Bearer s3cret"), Some(&fp)).is_ok());
        assert!(ensure_trigger_authorized(&headers("bearer  s3cret "), Some(&fp)).is_ok());
    }

    #[test]
    fn test_rejects_missing_or_wrong_token() {
        let fp = token_fingerprint("s3cret");
        assert!(ensure_trigger_authorized(&HeaderMap::new(), Some(&fp)).is_err());
        assert!(ensure_trigger_authorized(&headers("Bearer nope"), Some(&fp)).is_err());
        assert!(ensure_trigger_authorized(&headers("Basic s3cret"), Some(&fp)).is_err());
        assert!(ensure_trigger_authorized(&headers("Bearer s3cret"), None).is_err());
    }
}
