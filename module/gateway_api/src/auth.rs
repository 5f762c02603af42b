//! Bearer-token extraction from the `Authorization` header.

use axum::http::HeaderMap;

/// Pull the bearer token out of an `Authorization: Bearer <token>` header,
/// if present and well-formed. Absence (not malformedness) is the normal
/// "anonymous" case — callers turn that into `Error::AuthMissing` at the
/// point they actually require a key.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String>
{
  let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
  raw.strip_prefix("Bearer ").map(str::to_string)
}

#[cfg(test)]
mod tests
{
  use super::*;
  use axum::http::HeaderValue;

  #[test]
  fn extracts_token_from_well_formed_header()
  {
    let mut headers = HeaderMap::new();
    headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer gw_abc123"));
    assert_eq!(bearer_token(&headers), Some("gw_abc123".to_string()));
  }

  #[test]
  fn missing_header_is_none()
  {
    assert_eq!(bearer_token(&HeaderMap::new()), None);
  }

  #[test]
  fn non_bearer_scheme_is_none()
  {
    let mut headers = HeaderMap::new();
    headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
    assert_eq!(bearer_token(&headers), None);
  }
}
