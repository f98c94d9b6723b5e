use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use garde::Validate;
use serde::de::DeserializeOwned;

use super::error::ApiError;

/// JSON body validated with `garde`. Rejections render as 400 `{"error": ...}`.
pub struct ValidJson<T>(pub T);

/// Query string validated with `garde`. Rejections render as 400 `{"error": ...}`.
pub struct ValidQuery<T>(pub T);

fn checked<T: Validate<Context = ()>>(value: T) -> Result<T, ApiError> {
    value
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(value)
}

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate<Context = ()> + 'static,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        checked(value).map(ValidJson)
    }
}

impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate<Context = ()> + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        checked(value).map(ValidQuery)
    }
}
