use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify, Semaphore};

use crate::config::ServiceConfig;
use crate::delegate::{DownloadDelegate, RemovalCompletion};
use crate::downloader::Downloader;
use crate::errors::LectureMaterialsError;
use crate::material::{CachedContent, DownloadProgress, LectureMaterial, MaterialId};
use crate::notifier::{Delegates, Notification, Notifier};
use crate::storage::{LocalStorage, Storage};

/// Cache of downloadable lecture materials.
///
/// Delegate and removal callbacks are always invoked on the service's
/// notifier thread, never on the caller's thread.
pub trait LectureMaterialsService: Send + Sync {
    /// Cached content for `material`, if any. Never starts a download.
    fn obtain_from_cache(&self, material: &LectureMaterial) -> Option<CachedContent>;

    /// Fetch `material` into the cache in the background.
    ///
    /// If a download for the same material is already in flight, no second
    /// fetch is started and `delegate` joins the ones already registered:
    /// every registered delegate gets the terminal notification. If the
    /// material is already cached, `delegate` is told so right away.
    fn download_to_cache(&self, material: &LectureMaterial, delegate: Arc<dyn DownloadDelegate>);

    /// Delete the cached content of `material`.
    ///
    /// An in-flight download of the same material is cancelled and its
    /// delegates receive [`LectureMaterialsError::Cancelled`]. `completion`
    /// gets [`LectureMaterialsError::NotFound`] when there was neither
    /// cached content nor a download to cancel.
    fn remove_from_cache(&self, material: &LectureMaterial, completion: RemovalCompletion);

    /// Replace every delegate of the in-flight download of `material` with
    /// `delegate`. Fails with [`LectureMaterialsError::NoDownloadInFlight`]
    /// when nothing is being downloaded.
    fn update_delegate(
        &self,
        delegate: Arc<dyn DownloadDelegate>,
        material: &LectureMaterial,
    ) -> Result<(), LectureMaterialsError>;
}

enum MaterialRequest {
    Download {
        material: LectureMaterial,
        generation: u64,
        cancel: Arc<Notify>,
    },
    Remove {
        material: LectureMaterial,
        completion: RemovalCompletion,
        /// Index entry taken out at call time; its file is still on disk.
        cached: Option<CachedContent>,
        cancelled_download: bool,
    },
}

/// Bookkeeping for the one download a material may have in flight.
/// Whoever removes this entry owes its delegates the terminal notification.
struct InFlight {
    generation: u64,
    delegates: Delegates,
    cancel: Arc<Notify>,
}

struct Shared<D, S> {
    cache: DashMap<MaterialId, CachedContent>,
    in_flight: DashMap<MaterialId, InFlight>,
    downloader: D,
    storage: S,
    notifier: Notifier,
    download_permits: Semaphore,
    download_timeout: Option<Duration>,
}

pub struct CachingLectureMaterialsService<D, S = LocalStorage> {
    shared: Arc<Shared<D, S>>,
    request_senders: DashMap<MaterialId, mpsc::Sender<MaterialRequest>>, // One worker per material
    next_generation: AtomicU64,
    queue_capacity: usize,
    runtime: Handle,
}

impl<D> CachingLectureMaterialsService<D, LocalStorage>
where
    D: Downloader,
{
    /// Open the service over a [`LocalStorage`] rooted at `config.cache_dir`.
    pub async fn open_local(
        config: &ServiceConfig,
        downloader: D,
    ) -> Result<Self, LectureMaterialsError> {
        let storage = LocalStorage::new(config.cache_dir.clone());
        Self::open(config, downloader, storage).await
    }
}

impl<D, S> CachingLectureMaterialsService<D, S>
where
    D: Downloader,
    S: Storage,
{
    /// Open the service, restoring the cache index from whatever `storage`
    /// already holds. Must be called from within a Tokio runtime.
    pub async fn open(
        config: &ServiceConfig,
        downloader: D,
        storage: S,
    ) -> Result<Self, LectureMaterialsError> {
        let runtime = Handle::try_current()?;

        let purged = storage.purge_staging().await?;
        if purged > 0 {
            tracing::info!("Removed {purged} interrupted downloads from the cache");
        }
        let cache = DashMap::new();
        for content in storage.entries().await? {
            cache.insert(content.id.clone(), content);
        }
        tracing::debug!("Restored {} cached lecture materials", cache.len());

        let shared = Arc::new(Shared {
            cache,
            in_flight: DashMap::new(),
            downloader,
            storage,
            notifier: Notifier::spawn()?,
            download_permits: Semaphore::new(config.max_concurrent_downloads.max(1)),
            download_timeout: config.download_timeout(),
        });

        Ok(CachingLectureMaterialsService {
            shared,
            request_senders: DashMap::new(),
            next_generation: AtomicU64::new(0),
            queue_capacity: config.request_queue_capacity.max(1),
            runtime,
        })
    }

    pub fn list_cached(&self) -> Vec<MaterialId> {
        self.shared.cache.iter().map(|r| r.key().clone()).collect()
    }

    pub fn is_downloading(&self, material: &LectureMaterial) -> bool {
        self.shared.in_flight.contains_key(&material.id)
    }

    fn sender(&self, id: &MaterialId) -> mpsc::Sender<MaterialRequest> {
        self.request_senders
            .entry(id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                self.runtime
                    .spawn(run_worker(Arc::clone(&self.shared), id.clone(), rx));
                tx
            })
            .clone()
    }

    /// Unpublish `material` for a removal: drop its index entry and cancel
    /// its in-flight download, both under the in-flight entry lock so a
    /// finishing download cannot slip its content back in between.
    fn take_for_removal(&self, material: &LectureMaterial) -> (Option<CachedContent>, bool) {
        let entry = self.shared.in_flight.entry(material.id.clone());
        let cached = self.shared.cache.remove(&material.id).map(|(_, content)| content);
        let in_flight = match entry {
            Entry::Occupied(entry) => Some(entry.remove()),
            Entry::Vacant(_) => None,
        };
        let Some(in_flight) = in_flight else {
            return (cached, false);
        };
        tracing::debug!("Cancelling download of {}", material.id);
        in_flight.cancel.notify_one();
        self.shared.notifier.send(Notification::Finished {
            delegates: in_flight.delegates,
            material: material.clone(),
            result: Err(LectureMaterialsError::Cancelled(material.id.clone())),
        });
        (cached, true)
    }
}

impl<D, S> LectureMaterialsService for CachingLectureMaterialsService<D, S>
where
    D: Downloader,
    S: Storage,
{
    fn obtain_from_cache(&self, material: &LectureMaterial) -> Option<CachedContent> {
        self.shared
            .cache
            .get(&material.id)
            .map(|entry| entry.value().clone())
    }

    fn download_to_cache(&self, material: &LectureMaterial, delegate: Arc<dyn DownloadDelegate>) {
        let id = &material.id;
        if let Some(content) = self.obtain_from_cache(material) {
            tracing::debug!("{id} already cached");
            self.shared.notifier.send(Notification::Finished {
                delegates: vec![delegate],
                material: material.clone(),
                result: Ok(content),
            });
            return;
        }

        let (generation, cancel) = match self.shared.in_flight.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                tracing::debug!("{id} already downloading, adding delegate");
                entry.get_mut().delegates.push(delegate);
                return;
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let cancel = Arc::new(Notify::new());
                entry.insert(InFlight {
                    generation,
                    delegates: vec![delegate],
                    cancel: Arc::clone(&cancel),
                });
                (generation, cancel)
            }
        };

        let request = MaterialRequest::Download {
            material: material.clone(),
            generation,
            cancel,
        };
        if let Err(e) = self.sender(id).try_send(request) {
            let error = match e {
                mpsc::error::TrySendError::Full(_) => {
                    LectureMaterialsError::RequestQueueFull(id.clone())
                }
                mpsc::error::TrySendError::Closed(_) => LectureMaterialsError::ServiceStopped,
            };
            tracing::error!("Could not queue download of {id}: {error}");
            self.shared.finish(material, generation, Err(error));
        }
    }

    fn remove_from_cache(&self, material: &LectureMaterial, completion: RemovalCompletion) {
        let id = &material.id;
        let sender = self.sender(id);
        let permit = match sender.try_reserve() {
            Ok(permit) => permit,
            Err(e) => {
                let error = match e {
                    mpsc::error::TrySendError::Full(()) => {
                        LectureMaterialsError::RequestQueueFull(id.clone())
                    }
                    mpsc::error::TrySendError::Closed(()) => LectureMaterialsError::ServiceStopped,
                };
                tracing::error!("Could not queue removal of {id}: {error}");
                self.shared.notifier.send(Notification::Removed {
                    completion,
                    result: Err(error),
                });
                return;
            }
        };

        let (cached, cancelled_download) = self.take_for_removal(material);
        permit.send(MaterialRequest::Remove {
            material: material.clone(),
            completion,
            cached,
            cancelled_download,
        });
    }

    fn update_delegate(
        &self,
        delegate: Arc<dyn DownloadDelegate>,
        material: &LectureMaterial,
    ) -> Result<(), LectureMaterialsError> {
        match self.shared.in_flight.get_mut(&material.id) {
            Some(mut entry) => {
                entry.delegates = vec![delegate];
                Ok(())
            }
            None => Err(LectureMaterialsError::NoDownloadInFlight(
                material.id.clone(),
            )),
        }
    }
}

impl<D, S> Shared<D, S>
where
    D: Downloader,
    S: Storage,
{
    fn is_current(&self, id: &MaterialId, generation: u64) -> bool {
        self.in_flight
            .get(id)
            .is_some_and(|entry| entry.generation == generation)
    }

    fn report_progress(&self, material: &LectureMaterial, generation: u64, progress: DownloadProgress) {
        // Sent under the read guard: a removal cannot queue `Cancelled` ahead of it.
        if let Some(entry) = self.in_flight.get(&material.id) {
            if entry.generation == generation {
                self.notifier.send(Notification::Progress {
                    delegates: entry.delegates.clone(),
                    material: material.clone(),
                    progress,
                });
            }
        }
    }

    /// Deliver the terminal notification of `generation`, unless it was cancelled.
    fn finish(
        &self,
        material: &LectureMaterial,
        generation: u64,
        result: Result<CachedContent, LectureMaterialsError>,
    ) {
        match self
            .in_flight
            .remove_if(&material.id, |_, entry| entry.generation == generation)
        {
            Some((_, in_flight)) => self.notifier.send(Notification::Finished {
                delegates: in_flight.delegates,
                material: material.clone(),
                result,
            }),
            None => tracing::debug!("Download of {} was cancelled", material.id),
        }
    }

    async fn fetch(
        &self,
        material: &LectureMaterial,
        generation: u64,
    ) -> Result<Vec<u8>, LectureMaterialsError> {
        let _permit = self
            .download_permits
            .acquire()
            .await
            .map_err(|_| LectureMaterialsError::ServiceStopped)?;
        let report = |progress| self.report_progress(material, generation, progress);
        let download = self.downloader.download(material, &report);
        match self.download_timeout {
            Some(limit) => tokio::time::timeout(limit, download).await.map_err(|_| {
                LectureMaterialsError::download_failed(
                    &material.id,
                    format!("timed out after {}s", limit.as_secs()),
                )
            })?,
            None => download.await,
        }
    }

    async fn handle_download(&self, material: LectureMaterial, generation: u64, cancel: Arc<Notify>) {
        let id = &material.id;
        if !self.is_current(id, generation) {
            tracing::debug!("Skipping cancelled download of {id}");
            return;
        }
        let cached = self.cache.get(id).map(|entry| entry.value().clone());
        if let Some(content) = cached {
            self.finish(&material, generation, Ok(content));
            return;
        }

        tracing::debug!("Downloading {id} from {}", material.link);
        let fetched = tokio::select! {
            result = self.fetch(&material, generation) => result,
            _ = cancel.notified() => return,
        };
        let result = match fetched {
            Ok(data) => self.storage.store(id, data).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(content) => self.publish(&material, generation, content).await,
            Err(e) => {
                tracing::error!("Error downloading {id}: {e}");
                self.finish(&material, generation, Err(e));
            }
        }
    }

    /// Index freshly stored content and tell the delegates, unless a removal
    /// cancelled the download meanwhile, in which case the file is dropped.
    async fn publish(&self, material: &LectureMaterial, generation: u64, content: CachedContent) {
        let id = &material.id;
        let in_flight = match self.in_flight.entry(id.clone()) {
            Entry::Occupied(entry) if entry.get().generation == generation => {
                self.cache.insert(id.clone(), content.clone());
                Some(entry.remove())
            }
            _ => None,
        };
        match in_flight {
            Some(in_flight) => {
                tracing::debug!("Cached {id} ({} bytes)", content.size);
                self.notifier.send(Notification::Finished {
                    delegates: in_flight.delegates,
                    material: material.clone(),
                    result: Ok(content),
                });
            }
            None => {
                tracing::debug!("Download of {id} was cancelled, discarding it");
                if let Err(e) = self.storage.delete(id).await {
                    tracing::warn!("Error discarding cancelled download of {id}: {e}");
                }
            }
        }
    }

    async fn handle_remove(
        &self,
        material: LectureMaterial,
        completion: RemovalCompletion,
        cached: Option<CachedContent>,
        cancelled_download: bool,
    ) {
        let id = &material.id;
        let result = if let Some(content) = cached {
            let deleted = match self.storage.delete(id).await {
                Ok(()) => Ok(()),
                Err(LectureMaterialsError::Storage(e)) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!("Cached file for {id} was already gone");
                    Ok(())
                }
                Err(LectureMaterialsError::Storage(source)) => {
                    Err(LectureMaterialsError::RemovalFailed {
                        id: id.clone(),
                        source,
                    })
                }
                Err(e) => Err(e),
            };
            match deleted {
                Ok(()) => tracing::debug!("Removed {id} from cache"),
                // Still on disk, so it stays cached.
                Err(_) => {
                    self.cache.insert(id.clone(), content);
                }
            }
            deleted
        } else if cancelled_download {
            Ok(())
        } else {
            Err(LectureMaterialsError::NotFound(id.clone()))
        };
        if let Err(e) = &result {
            tracing::warn!("Error removing {id}: {e}");
        }
        self.notifier.send(Notification::Removed { completion, result });
    }
}

async fn run_worker<D, S>(
    shared: Arc<Shared<D, S>>,
    id: MaterialId,
    mut rx: mpsc::Receiver<MaterialRequest>,
) where
    D: Downloader,
    S: Storage,
{
    while let Some(request) = rx.recv().await {
        match request {
            MaterialRequest::Download {
                material,
                generation,
                cancel,
            } => shared.handle_download(material, generation, cancel).await,
            MaterialRequest::Remove {
                material,
                completion,
                cached,
                cancelled_download,
            } => {
                shared
                    .handle_remove(material, completion, cached, cancelled_download)
                    .await
            }
        }
    }
    tracing::debug!("Worker for {id} stopped");
}
