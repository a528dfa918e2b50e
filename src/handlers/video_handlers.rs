//! `POST /videos`: stream a video form upload straight into a multipart session.
//!
//! Form fields: `title` and `filename` (sent before `file`), then `file`.
//! The object key is derived from the slugged title, so the file part is
//! uploaded as it arrives without buffering the whole body.

use crate::{
    errors::AppError,
    handlers::auth::authorize,
    models::{multipart::UploadOptions, object::ObjectInfo},
    services::{
        media::{
            MEDIA_CACHE_CONTROL, is_allowed_video_type, normalize_content_type, public_url,
            video_key,
        },
        transfer::transfer,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State},
    http::HeaderMap,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

const MISSING_FIELDS: &str = "No file or filename or title provided";

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoUploadResp {
    pub success: bool,
    pub url: String,
}

pub async fn upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<VideoUploadResp>, AppError> {
    authorize(&headers, state.config.api_secret_key.as_deref())?;

    let mut title: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut uploaded: Option<ObjectInfo> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("title") => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::bad_request(err.to_string()))?,
                );
            }
            Some("filename") => {
                filename = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::bad_request(err.to_string()))?,
                );
            }
            Some("file") => {
                let client_name = filename
                    .clone()
                    .or_else(|| field.file_name().map(str::to_string));
                let (Some(title), Some(client_name)) = (title.as_deref(), client_name) else {
                    return Err(AppError::bad_request(MISSING_FIELDS));
                };
                if title.trim().is_empty() {
                    return Err(AppError::bad_request(MISSING_FIELDS));
                }

                let declared = field.content_type().unwrap_or_default();
                if !is_allowed_video_type(declared) {
                    return Err(AppError::bad_request(
                        "Invalid video file type. Allowed: MP4, WebM, OGG, AVI, MOV",
                    ));
                }
                let content_type = normalize_content_type(Some(declared), &client_name);

                let key = video_key(&state.config.key_prefix, title, &client_name);
                let options = UploadOptions {
                    content_type: Some(content_type),
                    cache_control: Some(MEDIA_CACHE_CONTROL.to_string()),
                    content_disposition: Some("inline".to_string()),
                };
                let body = field.map(|chunk| chunk.map_err(io::Error::other));

                let object = transfer(
                    &state.coordinator,
                    &key,
                    options,
                    body,
                    state.config.transfer_settings(),
                )
                .await?;
                tracing::info!("Video uploaded successfully: {}", object.key);
                uploaded = Some(object);
            }
            _ => {}
        }
    }

    let object = uploaded.ok_or_else(|| AppError::bad_request(MISSING_FIELDS))?;
    Ok(Json(VideoUploadResp {
        success: true,
        url: public_url(state.coordinator.bucket(), &state.config.region, &object.key),
    }))
}
