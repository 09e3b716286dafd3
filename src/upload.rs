//! VOC (voice-of-customer) file uploads.
//!
//! Filenames must carry the configured marker and an allowed extension,
//! compared case-insensitively. The file is stored under its original name
//! and the response URL points at it.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::{StorageConfig, UploadConfig};
use crate::storage::ObjectStore;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file is required")]
    MissingFile,

    #[error("filename must include {marker} and end with {extensions}")]
    InvalidFilename { marker: String, extensions: String },

    #[error("upload failed: {0}")]
    Storage(String),
}

impl UploadError {
    /// Whether the caller sent a bad request (as opposed to a storage failure).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Storage(_))
    }
}

/// Content type stored with the object.
pub fn content_type_for(filename: &str) -> &'static str {
    if filename.to_lowercase().ends_with(".txt") {
        "text/plain"
    } else {
        "application/pdf"
    }
}

pub struct VocUploader {
    store: Arc<dyn ObjectStore>,
    policy: UploadConfig,
    /// Public URL prefix for stored objects, including the key prefix.
    public_base: Option<String>,
}

impl VocUploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        policy: UploadConfig,
        storage: Option<&StorageConfig>,
    ) -> Self {
        let public_base = storage.and_then(|s| {
            s.public_base_url
                .as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), s.prefix))
        });
        Self {
            store,
            policy,
            public_base,
        }
    }

    pub fn validate_filename(&self, filename: &str) -> Result<(), UploadError> {
        let lower = filename.to_lowercase();
        let has_marker = lower.contains(&self.policy.required_marker.to_lowercase());
        let has_extension = self
            .policy
            .allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()));

        if has_marker && has_extension {
            Ok(())
        } else {
            Err(UploadError::InvalidFilename {
                marker: self.policy.required_marker.clone(),
                extensions: self.policy.allowed_extensions.join(" or "),
            })
        }
    }

    /// Validate, store, and return the file's URL.
    #[tracing::instrument(name = "upload.voc", skip(self, body), fields(bytes = body.len()))]
    pub async fn upload(&self, filename: &str, body: Vec<u8>) -> Result<String, UploadError> {
        if filename.is_empty() {
            return Err(UploadError::MissingFile);
        }
        self.validate_filename(filename)?;

        let stored_url = self
            .store
            .put_object(filename, body, content_type_for(filename))
            .await
            .map_err(|e| UploadError::Storage(format!("{:#}", e)))?;

        let url = match &self.public_base {
            Some(base) => format!("{}{}", base, filename),
            None => stored_url,
        };
        info!(target: "upload", url = %url, "voc file stored");
        Ok(url)
    }
}
