use async_trait::async_trait;

use crate::errors::LectureMaterialsError;
use crate::material::{DownloadProgress, LectureMaterial};

/// Progress sink handed to a [`Downloader`] for the duration of one fetch.
pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Fetches the bytes behind a material's link. Transport is up to the implementor.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    async fn download(
        &self,
        material: &LectureMaterial,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>, LectureMaterialsError>;
}
