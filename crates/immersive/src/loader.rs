//! Fetch and decode artwork off the owning thread, last request wins.
//!
//! Every [`TextureLoader::load`] bumps a shared generation counter and hands
//! the new value to its worker. Workers compare their generation against the
//! counter between steps and give up with [`LoadError::Aborted`] once a newer
//! request exists. Finished work comes back over a channel; the owner drains
//! it with [`TextureLoader::poll`] and must check [`TextureLoader::is_current`]
//! before uploading, since a worker can finish after being superseded.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

use crate::decode::{prepare_artwork, TextureImage};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Produces the raw bytes behind a source identifier.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, FetchError>;
}

/// Treats source identifiers as local file paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl ImageFetcher for FileFetcher {
    fn fetch(&self, id: &str) -> Result<Vec<u8>, FetchError> {
        std::fs::read(Path::new(id)).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(id.to_string()),
            _ => FetchError::Io {
                path: id.to_string(),
                error,
            },
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to fetch {id}: {reason}")]
    Fetch {
        id: String,
        #[source]
        reason: FetchError,
    },
    #[error("failed to decode {id}: {reason}")]
    Decode {
        id: String,
        #[source]
        reason: image::ImageError,
    },
    #[error("load superseded by a newer request")]
    Aborted,
}

/// Identifies one `load` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub source: String,
    pub generation: u64,
}

#[derive(Debug)]
pub struct Completion {
    pub ticket: LoadTicket,
    pub result: Result<TextureImage, LoadError>,
}

pub struct TextureLoader {
    fetcher: Arc<dyn ImageFetcher>,
    generation: Arc<AtomicU64>,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    blur_sigma: f32,
}

impl TextureLoader {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, blur_sigma: f32) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            fetcher,
            generation: Arc::new(AtomicU64::new(0)),
            sender,
            receiver,
            blur_sigma,
        }
    }

    pub fn set_blur_sigma(&mut self, blur_sigma: f32) {
        self.blur_sigma = blur_sigma;
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Starts loading `source`, superseding every earlier request.
    pub fn load(&self, source: &str) -> LoadTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ticket = LoadTicket {
            source: source.to_string(),
            generation,
        };
        tracing::debug!(source, generation, "starting texture load");

        let job = LoadJob {
            ticket: ticket.clone(),
            fetcher: Arc::clone(&self.fetcher),
            latest: Arc::clone(&self.generation),
            blur_sigma: self.blur_sigma,
        };
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name("immersive-loader".into())
            .spawn(move || {
                let ticket = job.ticket.clone();
                let result = job.run();
                let _ = sender.send(Completion { ticket, result });
            });
        if let Err(err) = spawned {
            tracing::warn!(source, error = %err, "failed to spawn loader thread");
            let _ = self.sender.send(Completion {
                ticket: ticket.clone(),
                result: Err(LoadError::Fetch {
                    id: source.to_string(),
                    reason: FetchError::Transport(format!("worker spawn failed: {err}")),
                }),
            });
        }
        ticket
    }

    /// Invalidates every outstanding request.
    pub fn cancel_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "cancelled pending texture loads");
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.current_generation()
    }

    /// Drains finished work without blocking.
    pub fn poll(&self) -> Vec<Completion> {
        self.receiver.try_iter().collect()
    }

    #[cfg(test)]
    pub(crate) fn wait(&self, count: usize, timeout: std::time::Duration) -> Vec<Completion> {
        let deadline = std::time::Instant::now() + timeout;
        let mut completions = Vec::with_capacity(count);
        while completions.len() < count {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => completions.push(completion),
                Err(_) => break,
            }
        }
        completions
    }
}

struct LoadJob {
    ticket: LoadTicket,
    fetcher: Arc<dyn ImageFetcher>,
    latest: Arc<AtomicU64>,
    blur_sigma: f32,
}

impl LoadJob {
    fn superseded(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.ticket.generation
    }

    fn run(self) -> Result<TextureImage, LoadError> {
        let id = &self.ticket.source;
        if self.superseded() {
            return Err(LoadError::Aborted);
        }
        let bytes = self.fetcher.fetch(id).map_err(|reason| LoadError::Fetch {
            id: id.clone(),
            reason,
        })?;
        if self.superseded() {
            return Err(LoadError::Aborted);
        }
        let image = prepare_artwork(&bytes, self.blur_sigma).map_err(|reason| {
            LoadError::Decode {
                id: id.clone(),
                reason,
            }
        })?;
        if self.superseded() {
            return Err(LoadError::Aborted);
        }
        tracing::trace!(
            source = %id,
            generation = self.ticket.generation,
            width = image.width,
            height = image.height,
            "decoded artwork"
        );
        Ok(image)
    }
}
