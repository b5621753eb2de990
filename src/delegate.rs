use crate::errors::LectureMaterialsError;
use crate::material::{CachedContent, DownloadProgress, LectureMaterial};

/// Observer of one in-flight download.
///
/// All calls happen on the service's notifier thread, in the order the
/// service produced them. `on_complete` is called exactly once per
/// registration, with the stored content or the reason the download ended.
pub trait DownloadDelegate: Send + Sync {
    fn on_progress(&self, _material: &LectureMaterial, _progress: DownloadProgress) {}

    fn on_complete(
        &self,
        material: &LectureMaterial,
        result: Result<&CachedContent, &LectureMaterialsError>,
    );
}

/// Completion callback for cache removal.
pub type RemovalCompletion = Box<dyn FnOnce(Result<(), LectureMaterialsError>) + Send>;
