use axum::{
    body::Body,
    extract::{Multipart, Path, Request, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use docshare_protocol::Action;

use crate::auth::Session;
use crate::error::ApiError;
use crate::models::{DownloadLinkResponse, FileListResponse, UploadResponse};
use crate::AppState;

pub async fn upload(
    session: Session,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    session.require(Action::Upload)?;

    if state.store.find_user_by_id(session.user_id).await?.is_none() {
        return Err(ApiError::NotFound("User not found".to_string()));
    }

    let stored = state.intake.accept(&mut multipart, session.user_id).await?;

    if let Err(e) = state.store.record_upload(&stored).await {
        state.intake.discard(Some(&stored)).await;
        return Err(e.into());
    }

    tracing::info!(
        "UPLOAD SUCCESS: {} ({} bytes, sha256 {}) by {}",
        stored.name,
        stored.size_bytes,
        stored.sha256,
        session.user_id
    );

    Ok(Json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        file: stored.path,
        file_id: stored.name,
        sha256: stored.sha256,
    }))
}

pub async fn issue_download_link(
    session: Session,
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<DownloadLinkResponse>, ApiError> {
    session.require(Action::IssueDownloadLink)?;

    if state.store.find_file(&file_id).await?.is_none() {
        return Err(ApiError::NotFound("File not found".to_string()));
    }

    let issued = state.tokens.issue_download(&file_id, session.user_id)?;
    tracing::info!("Download link issued for {} to {}", file_id, session.user_id);

    Ok(Json(DownloadLinkResponse {
        download_link: format!(
            "{}/users/files/download-link/{}",
            state.base_url, issued.token
        ),
        message: "Download link generated successfully".to_string(),
        expires_at: issued.expires_at,
    }))
}

pub async fn redeem_download_link(
    session: Session,
    State(state): State<Arc<AppState>>,
    Path(download_token): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    session.require(Action::RedeemDownloadLink)?;

    let grant = state.tokens.validate_download(&download_token)?;
    if grant.user_id != session.user_id {
        tracing::warn!(
            "Download link for {} issued to {} presented by {}",
            grant.file_id,
            grant.user_id,
            session.user_id
        );
        return Err(ApiError::Forbidden(
            "Access denied. You don't have access".to_string(),
        ));
    }

    let file = state
        .store
        .find_file(&grant.file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    match tokio::fs::metadata(&file.path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) | Err(_) => {
            tracing::error!("Registered file {} is missing on disk at {}", file.name, file.path);
            return Err(ApiError::NotFound("File not found".to_string()));
        }
    }

    let response = match ServeFile::new(&file.path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let mut response = response.map(Body::new);

    if response.status() == StatusCode::OK || response.status() == StatusCode::PARTIAL_CONTENT {
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&file.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        let disposition = format!(
            "attachment; filename=\"{}\"",
            file.original_name.replace('"', "")
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
        tracing::info!("DOWNLOAD: {} served to {}", file.name, session.user_id);
    }

    Ok(response.into_response())
}

pub async fn list_files(
    session: Session,
    State(state): State<Arc<AppState>>,
) -> Result<Json<FileListResponse>, ApiError> {
    session.require(Action::ListFiles)?;

    Ok(Json(FileListResponse {
        files: state.store.list_files().await?,
    }))
}
