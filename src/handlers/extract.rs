//! Request body extraction with the crate's error body on rejection.

use axum::extract::FromRequest;

use crate::error::AppError;

/// `Json<T>` whose rejections answer with [`AppError`] instead of plain text.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);
