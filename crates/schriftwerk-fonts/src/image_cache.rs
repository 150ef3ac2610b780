// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reference page images used as ground truth for font comparison.

use std::future::Future;
use std::path::Path;

use schriftwerk_core::error::{Result, SchriftwerkError};
use schriftwerk_core::types::ReferenceImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which rasterised inputs the document came with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputModes {
    pub image: bool,
    pub pdf: bool,
}

impl InputModes {
    /// Whether there is anything to compare rendered fonts against.
    pub fn has_reference(&self) -> bool {
        self.image || self.pdf
    }
}

/// Source of binarised page images.
pub trait ImageCache: Send + Sync {
    fn get_binary(&self, page: usize) -> impl Future<Output = Result<ReferenceImage>> + Send;

    fn input_modes(&self) -> InputModes;

    fn page_count(&self) -> usize;
}

/// Image cache backed by images already in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryImageCache {
    pages: Vec<ReferenceImage>,
    modes: InputModes,
}

impl MemoryImageCache {
    pub fn new(modes: InputModes) -> Self {
        Self {
            pages: Vec::new(),
            modes,
        }
    }

    /// Cache for a document with no rasterised input.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cache of `count` white pages, for runs without real scans.
    pub fn blank(count: usize, width: u32, height: u32) -> Self {
        let mut cache = Self::new(InputModes {
            image: count > 0,
            pdf: false,
        });
        for page in 0..count {
            cache.push(ReferenceImage::blank(page, width, height));
        }
        cache
    }

    /// Decode page images from disk, one file per page in order.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut cache = Self::new(InputModes {
            image: !paths.is_empty(),
            pdf: false,
        });
        for (page, path) in paths.iter().enumerate() {
            let path = path.as_ref();
            let decoded = image::open(path).map_err(|e| {
                SchriftwerkError::ImageError(format!("{}: {e}", path.display()))
            })?;
            cache.push(ReferenceImage::from_dynamic(page, &decoded));
        }
        debug!(pages = cache.pages.len(), "reference images decoded");
        Ok(cache)
    }

    /// Append a page; its index becomes the next position.
    pub fn push(&mut self, image: ReferenceImage) {
        let page = self.pages.len();
        self.pages.push(ReferenceImage { page, ..image });
    }
}

impl ImageCache for MemoryImageCache {
    async fn get_binary(&self, page: usize) -> Result<ReferenceImage> {
        self.pages
            .get(page)
            .cloned()
            .ok_or(SchriftwerkError::MissingImage(page))
    }

    fn input_modes(&self) -> InputModes {
        self.modes
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_cache_serves_each_page() {
        let cache = MemoryImageCache::blank(3, 20, 10);
        assert!(cache.input_modes().has_reference());
        assert_eq!(cache.page_count(), 3);

        let page = cache.get_binary(2).await.unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn missing_page_is_an_error() {
        let cache = MemoryImageCache::empty();
        assert!(!cache.input_modes().has_reference());
        assert!(matches!(
            cache.get_binary(0).await,
            Err(SchriftwerkError::MissingImage(0))
        ));
    }

    #[test]
    fn open_decodes_png_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page0.png");
        image::GrayImage::from_pixel(8, 6, image::Luma([0u8]))
            .save(&path)
            .unwrap();

        let cache = MemoryImageCache::open(&[path]).unwrap();
        assert_eq!(cache.page_count(), 1);
        assert!(cache.input_modes().image);
    }

    #[test]
    fn open_reports_unreadable_file() {
        let err = MemoryImageCache::open(&["/nonexistent/page.png"]).unwrap_err();
        assert!(matches!(err, SchriftwerkError::ImageError(_)));
    }
}
