// 🖼️ Blob Store - content-addressed property images
//
// Layout: <dir>/<first two hex chars>/<sha256 hex>
// Identical uploads share one file.

use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub hash: String,
    pub content_type: String,
    pub size: u64,
}

pub struct BlobStore {
    dir: PathBuf,
    max_bytes: u64,
}

/// 64 lowercase hex chars
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        BlobStore {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn path_for(&self, hash: &str) -> DomainResult<PathBuf> {
        if !is_valid_hash(hash) {
            return Err(DomainError::Validation(format!("invalid blob hash: {:?}", hash)));
        }
        Ok(self.dir.join(&hash[..2]).join(hash))
    }

    /// Store `bytes` and return their address
    pub fn put(&self, bytes: &[u8], content_type: &str) -> DomainResult<BlobRef> {
        let content_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(DomainError::Validation(format!(
                "unsupported image type: {:?}",
                content_type
            )));
        }
        if bytes.is_empty() {
            return Err(DomainError::Validation("empty upload".to_string()));
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(DomainError::Validation(format!(
                "image larger than {} bytes",
                self.max_bytes
            )));
        }

        let hash = content_hash(bytes);
        let path = self.path_for(&hash)?;

        if !path.exists() {
            let parent = path
                .parent()
                .ok_or_else(|| DomainError::Validation("blob path has no parent".to_string()))?;
            fs::create_dir_all(parent)?;

            // Write then rename so readers never see a partial file
            let tmp = parent.join(format!("{}.{}.tmp", hash, uuid::Uuid::new_v4().simple()));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)?;

            tracing::debug!(%hash, size = bytes.len(), "blob written");
        }

        Ok(BlobRef {
            hash,
            content_type,
            size: bytes.len() as u64,
        })
    }

    pub fn get(&self, hash: &str) -> DomainResult<Vec<u8>> {
        let path = self.path_for(hash)?;

        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DomainError::not_found("blob", hash),
            _ => DomainError::Io(e),
        })
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.path_for(hash).map(|p| p.exists()).unwrap_or(false)
    }

    /// Remove a blob. Missing blobs are not an error.
    pub fn delete(&self, hash: &str) -> DomainResult<()> {
        let path = self.path_for(hash)?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// IMAGE METADATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub hash: String,
    pub content_type: String,
    pub size: u64,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

/// Persist metadata for a stored blob. Re-recording the same hash keeps the first row.
pub fn record_image(conn: &Connection, blob: &BlobRef, uploaded_by: &str) -> DomainResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO images (hash, content_type, size, uploaded_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            blob.hash,
            blob.content_type,
            blob.size as i64,
            uploaded_by,
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(())
}

pub fn get_image_meta(conn: &Connection, hash: &str) -> DomainResult<Option<ImageMeta>> {
    let meta = conn
        .query_row(
            "SELECT hash, content_type, size, uploaded_by, created_at FROM images WHERE hash = ?1",
            [hash],
            |row| {
                let size: i64 = row.get(2)?;
                let created_at: String = row.get(4)?;

                Ok(ImageMeta {
                    hash: row.get(0)?,
                    content_type: row.get(1)?,
                    size: size as u64,
                    uploaded_by: row.get(3)?,
                    created_at: crate::db::parse_time(4, &created_at)?,
                })
            },
        )
        .optional()?;

    Ok(meta)
}
