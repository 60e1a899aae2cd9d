use axum::{
    extract::{FromRequest, Request},
    Json,
};
use validator::Validate;

use crate::handlers::ApiError;

/// JSON body that is parsed and then validated before the handler runs.
///
/// Both failures come back as the `invalid_request` body used by every other
/// client error, never as axum's plain-text rejection.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(ApiError::Malformed)?;
        value.validate().map_err(ApiError::Validation)?;
        Ok(AppJson(value))
    }
}
