//! Validates uploaded attachments before they enter a session.

use crate::orchestrator::{OrchestratorError, SessionOrchestrator};
use crate::session::{ImageRef, SessionId};
use pano_channels::{DocumentAttachment, PhotoVariant};
use std::sync::Arc;

/// Declared MIME types accepted for documents start with this.
pub const IMAGE_MIME_PREFIX: &str = "image/";

/// What happened to one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// Stored; the session now holds this many references.
    Stored(usize),
    /// Dropped without touching the session.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotAnImage { mime_type: String },
    MissingMimeType,
    NoVariants,
}

/// Picks what to store from photos and documents.
pub struct ImageIngestAdapter {
    orchestrator: Arc<SessionOrchestrator>,
}

impl ImageIngestAdapter {
    pub fn new(orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Store the largest variant of a photo.
    pub async fn ingest_photo(
        &self,
        session: SessionId,
        variants: &[PhotoVariant],
    ) -> Result<Ingested, OrchestratorError> {
        let Some(best) = select_largest_variant(variants) else {
            tracing::info!(session_id = %session, "Photo without variants, skipping");
            return Ok(Ingested::Skipped(SkipReason::NoVariants));
        };

        let count = self
            .orchestrator
            .append_reference(session, ImageRef::new(best.file_id.clone()))
            .await?;
        Ok(Ingested::Stored(count))
    }

    /// Store a document if it declares an image MIME type.
    pub async fn ingest_document(
        &self,
        session: SessionId,
        document: &DocumentAttachment,
    ) -> Result<Ingested, OrchestratorError> {
        if let Err(reason) = check_image_mime(document.mime_type.as_deref()) {
            tracing::info!(
                session_id = %session,
                mime_type = document.mime_type.as_deref().unwrap_or("<none>"),
                "Document is not an image, skipping"
            );
            return Ok(Ingested::Skipped(reason));
        }

        let count = self
            .orchestrator
            .append_reference(session, ImageRef::new(document.file_id.clone()))
            .await?;
        Ok(Ingested::Stored(count))
    }
}

/// The variant with the largest byte size; the first one wins ties.
/// Unknown sizes count as zero.
pub fn select_largest_variant(variants: &[PhotoVariant]) -> Option<&PhotoVariant> {
    variants.iter().fold(None, |best: Option<&PhotoVariant>, v| match best {
        Some(b) if b.file_size.unwrap_or(0) >= v.file_size.unwrap_or(0) => Some(b),
        _ => Some(v),
    })
}

fn check_image_mime(mime_type: Option<&str>) -> Result<(), SkipReason> {
    let Some(mime) = mime_type else {
        return Err(SkipReason::MissingMimeType);
    };

    let is_image = mime
        .get(..IMAGE_MIME_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(IMAGE_MIME_PREFIX));
    if is_image {
        Ok(())
    } else {
        Err(SkipReason::NotAnImage {
            mime_type: mime.to_string(),
        })
    }
}
