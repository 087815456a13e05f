//! Upload intake: multipart field extraction, office-format filtering,
//! size cap and placement on disk.

use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::StoredFile;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const FILE_FIELD: &str = "file";

const MAX_NAME_CHARS: usize = 128;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Please upload a file")]
    MissingFile,

    #[error("Only one file may be uploaded per request")]
    TooManyFiles,

    #[error("Wrong format of file. Only .pptx, .docx, .xlsx files are allowed!")]
    UnsupportedFormat,

    #[error("Wrong format of file. Declared type {declared:?} does not match .{extension}")]
    MimeMismatch { extension: &'static str, declared: String },

    #[error("File too large. Maximum size is 10 MiB")]
    TooLarge,

    #[error("Malformed upload: {0}")]
    Multipart(String),

    #[error("upload storage failure: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MultipartError> for IntakeError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IntakeError::TooLarge
        } else {
            IntakeError::Multipart(err.body_text())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeFormat {
    Docx,
    Pptx,
    Xlsx,
}

impl OfficeFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OfficeFormat::Docx => "docx",
            OfficeFormat::Pptx => "pptx",
            OfficeFormat::Xlsx => "xlsx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OfficeFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OfficeFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            OfficeFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "docx" => Some(OfficeFormat::Docx),
            "pptx" => Some(OfficeFormat::Pptx),
            "xlsx" => Some(OfficeFormat::Xlsx),
            _ => None,
        }
    }

    /// Extension and declared MIME type must both name the same format.
    pub fn check(file_name: &str, content_type: &str) -> Result<Self, IntakeError> {
        let format = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
            .ok_or(IntakeError::UnsupportedFormat)?;

        let declared = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if declared != format.mime_type() {
            return Err(IntakeError::MimeMismatch {
                extension: format.extension(),
                declared,
            });
        }

        Ok(format)
    }
}

/// Strips any client-supplied directory part and characters that have no
/// business in a file name.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');

    // Keep the tail so the extension survives truncation.
    let skip = trimmed.chars().count().saturating_sub(MAX_NAME_CHARS);
    trimmed.chars().skip(skip).collect()
}

/// `<unix millis>-<8 hex>-<original>`: sortable by upload time, and the
/// random part keeps same-millisecond uploads apart.
pub fn generate_name(original_name: &str) -> String {
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        hex::encode(suffix),
        original_name
    )
}

pub struct UploadIntake {
    dir: PathBuf,
}

impl UploadIntake {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Reads the request's multipart body and stores its single `file`
    /// field. Nothing is left on disk when this returns an error.
    pub async fn accept(
        &self,
        multipart: &mut Multipart,
        owner_id: Uuid,
    ) -> Result<StoredFile, IntakeError> {
        let mut accepted: Option<StoredFile> = None;

        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    self.discard(accepted.as_ref()).await;
                    return Err(e.into());
                }
            };

            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            if accepted.is_some() {
                self.discard(accepted.as_ref()).await;
                return Err(IntakeError::TooManyFiles);
            }

            accepted = Some(self.store_field(field, owner_id).await?);
        }

        accepted.ok_or(IntakeError::MissingFile)
    }

    async fn store_field(&self, field: Field<'_>, owner_id: Uuid) -> Result<StoredFile, IntakeError> {
        let original_name = field
            .file_name()
            .map(sanitize_file_name)
            .filter(|name| !name.is_empty())
            .ok_or(IntakeError::MissingFile)?;
        let format = OfficeFormat::check(&original_name, field.content_type().unwrap_or_default())?;

        let name = generate_name(&original_name);
        let final_path = self.dir.join(&name);
        let part_path = self.dir.join(format!("{}.part", name));

        let (size_bytes, sha256) = match write_part(field, &part_path).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e.into());
        }

        Ok(StoredFile {
            name,
            original_name,
            path: final_path.to_string_lossy().into_owned(),
            owner_id,
            content_type: format.mime_type().to_string(),
            size_bytes,
            sha256,
            created_at: Utc::now(),
        })
    }

    /// Removes a file written earlier in a request that is now being rejected.
    pub async fn discard(&self, file: Option<&StoredFile>) {
        if let Some(file) = file {
            if let Err(e) = tokio::fs::remove_file(&file.path).await {
                tracing::warn!("Failed to remove rejected upload {}: {}", file.path, e);
            }
        }
    }
}

async fn write_part(mut field: Field<'_>, path: &Path) -> Result<(i64, String), IntakeError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut size = 0usize;

    while let Some(chunk) = field.chunk().await? {
        size += chunk.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(IntakeError::TooLarge);
        }
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok((size as i64, hex::encode(hasher.finalize())))
}
