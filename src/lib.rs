//! Local cache of downloadable lecture materials (slide decks, handouts).
//!
//! [`CachingLectureMaterialsService`] looks materials up in the cache,
//! downloads them in the background through a pluggable [`Downloader`],
//! removes them again and lets callers swap the [`DownloadDelegate`]
//! watching a download. Callbacks run on a dedicated notifier thread.

pub mod config;
pub mod delegate;
pub mod downloader;
pub mod errors;
pub mod logging;
pub mod manager;
pub mod material;
mod notifier;
pub mod storage;

pub use config::ServiceConfig;
pub use delegate::{DownloadDelegate, RemovalCompletion};
pub use downloader::{Downloader, ProgressFn};
pub use errors::LectureMaterialsError;
pub use manager::{CachingLectureMaterialsService, LectureMaterialsService};
pub use material::{CachedContent, DownloadProgress, LectureMaterial, MaterialId};
pub use storage::{LocalStorage, Storage};
