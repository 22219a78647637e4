//! Auxiliary image downloads: note thumbnails and ink note images.

use crate::error::Result;
use crate::request_context::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use core_library::{Guid, LocalId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[async_trait]
pub trait NoteThumbnailDownloader: Send + Sync {
    async fn download_note_thumbnail(
        &self,
        note_guid: &Guid,
        size: u32,
        format: ImageFormat,
        ctx: &RequestContext,
    ) -> Result<Bytes>;
}

#[async_trait]
pub trait InkNoteImageDownloader: Send + Sync {
    /// Rendered PNG of the ink resource.
    async fn download(
        &self,
        resource_guid: &Guid,
        size: ImageSize,
        ctx: &RequestContext,
    ) -> Result<Bytes>;
}

/// Creates downloaders bound to the scope and credentials of a notebook.
#[async_trait]
pub trait DownloaderFactory: Send + Sync {
    async fn create_note_thumbnail_downloader(
        &self,
        notebook_local_id: LocalId,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn NoteThumbnailDownloader>>;

    async fn create_ink_note_image_downloader(
        &self,
        notebook_local_id: LocalId,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn InkNoteImageDownloader>>;
}
