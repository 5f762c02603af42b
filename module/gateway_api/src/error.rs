//! The single place a `gateway_types::Error` becomes an HTTP response. Every
//! route handler returns `Result<_, ApiError>`; nothing downstream of this
//! module inspects a status code.

use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use gateway_types::Error;

/// Wraps a [`gateway_types::Error`] so it can be returned directly from an
/// axum handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError
{
  fn from(err: Error) -> Self
  {
    Self(err)
  }
}

#[derive(Serialize)]
struct ErrorBody
{
  detail: String,
}

impl IntoResponse for ApiError
{
  fn into_response(self) -> Response
  {
    let status = status_for(&self.0);
    (status, Json(ErrorBody { detail: self.0.to_string() })).into_response()
  }
}

/// Maps every [`Error`] variant to its HTTP status code.
fn status_for(err: &Error) -> StatusCode
{
  match err
  {
    Error::AuthMissing | Error::AuthInvalid | Error::AuthRevoked => StatusCode::UNAUTHORIZED,
    Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
    Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
    Error::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
    Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
    Error::TaskTimedOut => StatusCode::REQUEST_TIMEOUT,
    Error::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    Error::UpstreamUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    Error::UpstreamRejected { .. } => StatusCode::BAD_GATEWAY,
    Error::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
    Error::UnknownModel(_) => StatusCode::INTERNAL_SERVER_ERROR,
    Error::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
  }
}

/// `Json<T>` extractor that reports malformed bodies as `Error::BadRequest`
/// (400, `{"detail": ...}`) instead of axum's default 422 rejection, so a
/// caller never sees two different shapes for "you sent bad JSON".
pub struct JsonBody<T>(pub T);

#[async_trait::async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
  T: serde::de::DeserializeOwned,
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request(req: axum::http::Request<axum::body::Body>, state: &S) -> Result<Self, Self::Rejection>
  {
    match Json::<T>::from_request(req, state).await
    {
      Ok(value) => Ok(Self(value.0)),
      Err(rejection) => Err(ApiError(Error::BadRequest { field: "body".into(), reason: rejection.to_string() })),
    }
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn rate_limited_and_budget_exceeded_share_429_but_differ_in_detail()
  {
    assert_eq!(status_for(&Error::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(status_for(&Error::BudgetExceeded("proj_1".into())), StatusCode::TOO_MANY_REQUESTS);
    assert_ne!(Error::RateLimited.to_string(), Error::BudgetExceeded("proj_1".into()).to_string());
  }

  #[test]
  fn permission_denied_is_403_and_auth_errors_are_401()
  {
    assert_eq!(status_for(&Error::PermissionDenied("bash".into())), StatusCode::FORBIDDEN);
    assert_eq!(status_for(&Error::AuthMissing), StatusCode::UNAUTHORIZED);
    assert_eq!(status_for(&Error::AuthInvalid), StatusCode::UNAUTHORIZED);
    assert_eq!(status_for(&Error::AuthRevoked), StatusCode::UNAUTHORIZED);
  }

  #[test]
  fn task_timed_out_is_408()
  {
    assert_eq!(status_for(&Error::TaskTimedOut), StatusCode::REQUEST_TIMEOUT);
  }

  #[test]
  fn upstream_unavailable_is_500_but_upstream_rejected_is_502()
  {
    assert_eq!(status_for(&Error::UpstreamUnavailable("connection refused".into())), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(status_for(&Error::UpstreamRejected { status: 400, body: String::new() }), StatusCode::BAD_GATEWAY);
  }
}
