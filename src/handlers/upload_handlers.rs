//! HTTP handlers exposing the four multipart operations.
//!
//! Each handler checks the bearer token, translates the request into one
//! coordinator call and serializes the result as JSON.

use crate::{
    errors::AppError,
    handlers::auth::authorize,
    models::multipart::{CompletedPart, UploadOptions},
    services::{
        media::{MEDIA_CACHE_CONTROL, public_url},
        object_store::UploadError,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadReq {
    pub key: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResp {
    pub key: String,
    pub upload_id: String,
}

/// Query string carrying the object key for part and abort requests.
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadReq {
    pub key: String,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResp {
    pub key: String,
    pub e_tag: String,
    pub size: i64,
    pub url: String,
}

/// `POST /uploads`: open a multipart session.
pub async fn create_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateUploadReq>,
) -> Result<Json<CreateUploadResp>, AppError> {
    authorize(&headers, state.config.api_secret_key.as_deref())?;

    let options = UploadOptions {
        content_type: req.content_type,
        cache_control: Some(MEDIA_CACHE_CONTROL.to_string()),
        content_disposition: None,
    };
    let upload_id = state.coordinator.begin_with(&req.key, options).await?;

    Ok(Json(CreateUploadResp {
        key: req.key,
        upload_id,
    }))
}

/// `PUT /uploads/{upload_id}/parts/{index}?key=`: upload one chunk.
///
/// When `Content-MD5` is sent the body is verified against it first.
pub async fn upload_part(
    State(state): State<AppState>,
    Path((upload_id, index)): Path<(String, u32)>,
    Query(q): Query<KeyQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    authorize(&headers, state.config.api_secret_key.as_deref())?;

    if let Some(expected) = headers.get(CONTENT_MD5) {
        let matches = expected
            .to_str()
            .ok()
            .and_then(|v| general_purpose::STANDARD.decode(v.trim()).ok())
            .is_some_and(|digest| digest == md5::compute(&body).0);
        if !matches {
            return Err(UploadError::BadDigest(index.saturating_add(1)).into());
        }
    }

    let record = state
        .coordinator
        .upload_part(&q.key, &upload_id, body, index)
        .await?;

    let mut response = Json(&record).into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.e_tag)) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}

/// `POST /uploads/{upload_id}/complete`: finalize from the collected part records.
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CompleteUploadReq>,
) -> Result<Json<CompleteUploadResp>, AppError> {
    authorize(&headers, state.config.api_secret_key.as_deref())?;

    let object = state
        .coordinator
        .complete(&req.key, &upload_id, &req.parts)
        .await?;

    Ok(Json(CompleteUploadResp {
        url: public_url(state.coordinator.bucket(), &state.config.region, &object.key),
        key: object.key,
        e_tag: object.etag,
        size: object.size_bytes,
    }))
}

/// `DELETE /uploads/{upload_id}?key=`: abort and reclaim the session.
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Query(q): Query<KeyQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    authorize(&headers, state.config.api_secret_key.as_deref())?;
    state.coordinator.abort(&q.key, &upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
