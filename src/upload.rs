//! File uploads for authoring forms: audio for listening parts, images for
//! diagrams/charts, transcripts.
//!
//! Validation happens twice: up front against the file name, declared type and
//! declared size, then again while streaming, because multipart bodies do not
//! carry a trustworthy size. Partial files are removed on any failure.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::UploadCfg;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
  Audio,
  Image,
  Transcript,
}

impl UploadKind {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "audio" => Some(UploadKind::Audio),
      "image" => Some(UploadKind::Image),
      "transcript" => Some(UploadKind::Transcript),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      UploadKind::Audio => "audio",
      UploadKind::Image => "image",
      UploadKind::Transcript => "transcript",
    }
  }

  fn extensions(&self) -> &'static [&'static str] {
    match self {
      UploadKind::Audio => &["mp3", "wav", "m4a", "ogg", "aac"],
      UploadKind::Image => &["png", "jpg", "jpeg", "gif", "webp", "svg"],
      UploadKind::Transcript => &["txt", "pdf", "doc", "docx", "vtt", "srt"],
    }
  }

  fn accepts_mime(&self, mime: &str) -> bool {
    let mime = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if mime.is_empty() || mime == "application/octet-stream" {
      return true;
    }
    match self {
      UploadKind::Audio => mime.starts_with("audio/"),
      UploadKind::Image => mime.starts_with("image/"),
      UploadKind::Transcript => matches!(
        mime.as_str(),
        "text/plain"
          | "text/vtt"
          | "application/x-subrip"
          | "application/pdf"
          | "application/msword"
          | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
      ),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
  #[error("unsupported {kind} file: {detail}")]
  UnsupportedType { kind: &'static str, detail: String },
  #[error("{kind} file exceeds the {limit} byte limit")]
  TooLarge { kind: &'static str, limit: u64 },
  #[error("uploaded file is empty")]
  Empty,
  #[error("upload stream failed: {0}")]
  Stream(String),
  #[error("storage error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct UploadProgress {
  pub received: u64,
  pub total: Option<u64>,
}

impl UploadProgress {
  pub fn percent(&self) -> Option<u8> {
    self.total.filter(|t| *t > 0).map(|t| ((self.received.min(t) * 100) / t) as u8)
  }
}

/// Thins per-chunk progress down to quarter steps (25, 50, 75, 100 %).
/// Uploads without a declared size have no percentage and never report.
#[derive(Debug, Default)]
pub struct ProgressSteps {
  last: u8,
}

impl ProgressSteps {
  pub fn crossed(&mut self, p: UploadProgress) -> Option<u8> {
    let step = p.percent()? / 25 * 25;
    if step > self.last {
      self.last = step;
      Some(step)
    } else {
      None
    }
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct StoredFile {
  pub url: String,
  pub kind: UploadKind,
  pub original_name: String,
  pub bytes: u64,
}

/// Where upload bytes come from. Implemented for multipart fields.
#[allow(async_fn_in_trait)]
pub trait ChunkSource {
  async fn next_chunk(&mut self) -> Result<Option<Bytes>, UploadError>;
}

impl ChunkSource for axum::extract::multipart::Field<'_> {
  async fn next_chunk(&mut self) -> Result<Option<Bytes>, UploadError> {
    self.chunk().await.map_err(|e| UploadError::Stream(e.to_string()))
  }
}

fn extension(filename: &str) -> Option<String> {
  Path::new(filename)
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase())
}

#[derive(Clone, Debug)]
pub struct UploadStore {
  dir: PathBuf,
  public_base: String,
  cfg: UploadCfg,
}

impl UploadStore {
  pub fn new(cfg: &UploadCfg) -> Self {
    Self {
      dir: PathBuf::from(&cfg.dir),
      public_base: cfg.public_base_url.trim_end_matches('/').to_string(),
      cfg: cfg.clone(),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn limit(&self, kind: UploadKind) -> u64 {
    match kind {
      UploadKind::Audio => self.cfg.max_audio_bytes,
      UploadKind::Image => self.cfg.max_image_bytes,
      UploadKind::Transcript => self.cfg.max_transcript_bytes,
    }
  }

  /// Up-front checks: extension, declared content type, declared size.
  pub fn validate(
    &self,
    kind: UploadKind,
    filename: &str,
    content_type: Option<&str>,
    declared_size: Option<u64>,
  ) -> Result<String, UploadError> {
    let ext = extension(filename)
      .filter(|e| kind.extensions().contains(&e.as_str()))
      .ok_or_else(|| UploadError::UnsupportedType {
        kind: kind.as_str(),
        detail: format!("'{}' (allowed: {})", filename, kind.extensions().join(", ")),
      })?;
    if let Some(ct) = content_type {
      if !kind.accepts_mime(ct) {
        return Err(UploadError::UnsupportedType { kind: kind.as_str(), detail: format!("content type {ct}") });
      }
    }
    let limit = self.limit(kind);
    if declared_size.is_some_and(|s| s > limit) {
      return Err(UploadError::TooLarge { kind: kind.as_str(), limit });
    }
    Ok(ext)
  }

  /// Stream chunks to disk, reporting progress after every chunk.
  #[instrument(level = "info", skip_all, fields(kind = kind.as_str(), %filename, ?total))]
  pub async fn save<S, F>(
    &self,
    kind: UploadKind,
    filename: &str,
    content_type: Option<&str>,
    total: Option<u64>,
    source: &mut S,
    mut progress: F,
  ) -> Result<StoredFile, UploadError>
  where
    S: ChunkSource,
    F: FnMut(UploadProgress),
  {
    let ext = self.validate(kind, filename, content_type, total)?;
    let limit = self.limit(kind);

    let kind_dir = self.dir.join(kind.as_str());
    tokio::fs::create_dir_all(&kind_dir).await?;
    let stored_name = format!("{}.{}", Uuid::new_v4(), ext);
    let path = kind_dir.join(&stored_name);

    let result = write_chunks(&path, source, limit, kind, total, &mut progress).await;
    let bytes = match result {
      Ok(0) => {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(UploadError::Empty);
      }
      Ok(n) => n,
      Err(e) => {
        warn!(target: "upload", error = %e, path = %path.display(), "Upload failed; removing partial file");
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
      }
    };

    let url = format!("{}/{}/{}", self.public_base, kind.as_str(), stored_name);
    info!(target: "upload", %url, bytes, "Upload stored");
    Ok(StoredFile { url, kind, original_name: filename.to_string(), bytes })
  }
}

async fn write_chunks<S, F>(
  path: &Path,
  source: &mut S,
  limit: u64,
  kind: UploadKind,
  total: Option<u64>,
  progress: &mut F,
) -> Result<u64, UploadError>
where
  S: ChunkSource,
  F: FnMut(UploadProgress),
{
  let mut file = tokio::fs::File::create(path).await?;
  let mut received: u64 = 0;
  while let Some(chunk) = source.next_chunk().await? {
    received += chunk.len() as u64;
    if received > limit {
      return Err(UploadError::TooLarge { kind: kind.as_str(), limit });
    }
    file.write_all(&chunk).await?;
    let p = UploadProgress { received, total };
    debug!(target: "upload", received, percent = ?p.percent(), "Upload progress");
    progress(p);
  }
  file.flush().await?;
  Ok(received)
}
