use std::io;

use thiserror::Error;

use crate::material::MaterialId;

#[derive(Debug, Error)]
pub enum LectureMaterialsError {
    #[error("Lecture material {0} is not cached")]
    NotFound(MaterialId),
    #[error("Error downloading lecture material {id}: {reason}")]
    DownloadFailed { id: MaterialId, reason: String },
    #[error("Error removing lecture material {id}")]
    RemovalFailed {
        id: MaterialId,
        #[source]
        source: io::Error,
    },
    #[error("Error storing file")]
    Storage(#[from] io::Error),
    #[error("Download of lecture material {0} was cancelled")]
    Cancelled(MaterialId),
    #[error("No download in flight for lecture material {0}")]
    NoDownloadInFlight(MaterialId),
    #[error("Invalid lecture material id {0:?}")]
    InvalidMaterialId(String),
    #[error("Invalid configuration")]
    Config(#[from] toml::de::Error),
    #[error("Request queue for lecture material {0} is full")]
    RequestQueueFull(MaterialId),
    #[error("No Tokio runtime available")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("Lecture materials service has stopped")]
    ServiceStopped,
}

impl LectureMaterialsError {
    pub fn download_failed(id: &MaterialId, reason: impl ToString) -> Self {
        LectureMaterialsError::DownloadFailed {
            id: id.clone(),
            reason: reason.to_string(),
        }
    }
}
