//! Locally-owned display resources
//!
//! A just-uploaded image gets a `blob:` URL before any remote URL exists.
//! The bytes stay registered until the URL is released, so a later save can
//! still upload them.

use super::ImageFile;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Scheme prefix of locally-owned display URLs
pub const LOCAL_URL_PREFIX: &str = "blob:";

/// True when `url` names a locally-owned display resource
pub fn is_local_url(url: &str) -> bool {
    url.starts_with(LOCAL_URL_PREFIX)
}

/// Allocation and release of local display URLs
pub trait DisplayResources: Send + Sync {
    /// Register an image and return its `blob:` URL
    fn allocate(&self, image: ImageFile) -> String;

    /// Look up the image behind a `blob:` URL
    fn resolve(&self, url: &str) -> Option<ImageFile>;

    /// Release a `blob:` URL; unknown URLs are ignored
    fn release(&self, url: &str);
}

/// In-memory registry of local display resources
#[derive(Default)]
pub struct LocalResources {
    entries: Mutex<HashMap<String, ImageFile>>,
}

impl LocalResources {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ImageFile>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live (unreleased) resources
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl DisplayResources for LocalResources {
    fn allocate(&self, image: ImageFile) -> String {
        let url = format!("{}snapsheet/{}", LOCAL_URL_PREFIX, Uuid::new_v4());
        self.entries().insert(url.clone(), image);
        url
    }

    fn resolve(&self, url: &str) -> Option<ImageFile> {
        self.entries().get(url).cloned()
    }

    fn release(&self, url: &str) {
        if self.entries().remove(url).is_none() {
            tracing::debug!(url = %url, "Release of unknown display resource ignored");
        }
    }
}
