//! Extractors whose rejections use the JSON error envelope

use axum::extract::{FromRequest, FromRequestParts};
use relayforge_common::errors::AppError;

/// `axum::Json` with enveloped rejections
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Path` with enveloped rejections
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// `axum::extract::Query` with enveloped rejections
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);
