use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};

use crate::delegate::{DownloadDelegate, RemovalCompletion};
use crate::errors::LectureMaterialsError;
use crate::material::{CachedContent, DownloadProgress, LectureMaterial};

pub(crate) type Delegates = Vec<Arc<dyn DownloadDelegate>>;

pub(crate) enum Notification {
    Progress {
        delegates: Delegates,
        material: LectureMaterial,
        progress: DownloadProgress,
    },
    Finished {
        delegates: Delegates,
        material: LectureMaterial,
        result: Result<CachedContent, LectureMaterialsError>,
    },
    Removed {
        completion: RemovalCompletion,
        result: Result<(), LectureMaterialsError>,
    },
}

/// Handle to the thread every callback runs on.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: Sender<Notification>,
}

impl Notifier {
    pub(crate) fn spawn() -> Result<Self, LectureMaterialsError> {
        let (tx, rx) = channel::unbounded();
        thread::Builder::new()
            .name("lecture-materials-notifier".to_string())
            .spawn(move || run(rx))?;
        Ok(Notifier { tx })
    }

    pub(crate) fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::error!("Notifier thread is gone, dropping notification");
        }
    }
}

fn run(rx: Receiver<Notification>) {
    while let Ok(notification) = rx.recv() {
        match notification {
            Notification::Progress {
                delegates,
                material,
                progress,
            } => {
                for delegate in &delegates {
                    delegate.on_progress(&material, progress);
                }
            }
            Notification::Finished {
                delegates,
                material,
                result,
            } => {
                for delegate in &delegates {
                    delegate.on_complete(&material, result.as_ref());
                }
            }
            Notification::Removed { completion, result } => completion(result),
        }
    }
    tracing::debug!("Notifier thread exiting");
}
