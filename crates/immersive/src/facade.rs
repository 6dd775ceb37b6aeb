use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use immersive_config::{
    load_config, save_config, save_enabled, ConfigPatch, ImmersiveConfig, PreferenceStore,
};

use crate::gate::CapabilityGate;
use crate::gpu::{FrameError, RenderSurface};
use crate::loader::{Completion, ImageFetcher, LoadError, TextureLoader};
use crate::manager::{ContextManager, FrameInputs, Phase};
use crate::scheduler::FrameScheduler;
use crate::types::{Backend, ImmersiveState, Metrics, UnavailableReason};

/// The ambient background renderer.
///
/// One instance per drawing surface, owned and driven by the host's UI
/// thread. Nothing here panics or returns errors to the host: every failure
/// turns into an [`ImmersiveState`] with an [`UnavailableReason`].
pub struct Immersive {
    gate: CapabilityGate,
    store: Box<dyn PreferenceStore>,
    config: ImmersiveConfig,
    manager: ContextManager,
    loader: TextureLoader,
    scheduler: FrameScheduler,
    surface: Option<Rc<dyn RenderSurface>>,
    /// `None` exactly while rendering is active.
    reason: Option<UnavailableReason>,
    backend: Backend,
    /// Most recently requested source, reloaded after init and restore.
    requested: Option<String>,
    started: Instant,
    subscribers: Vec<Sender<ImmersiveState>>,
}

impl Immersive {
    pub fn new(store: Box<dyn PreferenceStore>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self::with_gate(store, fetcher, CapabilityGate::default())
    }

    pub fn with_gate(
        store: Box<dyn PreferenceStore>,
        fetcher: Arc<dyn ImageFetcher>,
        gate: CapabilityGate,
    ) -> Self {
        let config = load_config(store.as_ref());
        Self {
            gate,
            manager: ContextManager::new(config.crossfade),
            loader: TextureLoader::new(fetcher, config.blur_radius),
            scheduler: FrameScheduler::new(config.target_fps, config.pause_when_hidden),
            store,
            config,
            surface: None,
            reason: Some(UnavailableReason::Uninitialized),
            backend: Backend::Disabled,
            requested: None,
            started: Instant::now(),
            subscribers: Vec::new(),
        }
    }

    /// Mounts the background on `surface`.
    ///
    /// The gate is evaluated first; when it fails the surface is never asked
    /// for a device.
    pub fn init(&mut self, surface: Rc<dyn RenderSurface>) {
        if self.manager.phase() != Phase::Uninitialized {
            tracing::debug!("init ignored: already initialised");
            return;
        }
        self.surface = Some(surface);
        self.start();
    }

    fn start(&mut self) {
        let verdict = self.gate.evaluate(self.store.as_ref());
        if let Some(reason) = verdict.reason {
            tracing::info!(%reason, "immersive background unavailable");
            self.set_unavailable(reason);
            return;
        }
        let Some(surface) = self.surface.clone() else {
            tracing::debug!("start skipped: no surface attached");
            return;
        };
        match self.manager.create(surface.as_ref()) {
            Ok(()) => self.activate(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to initialise immersive background");
                self.set_unavailable(UnavailableReason::InitFailed);
            }
        }
    }

    fn activate(&mut self) {
        let software = self
            .manager
            .adapter()
            .map(|adapter| adapter.is_software())
            .unwrap_or(false);
        self.backend = if software {
            Backend::Fallback
        } else {
            Backend::Accelerated
        };
        if let Some(adapter) = self.manager.adapter() {
            tracing::info!(
                adapter = %adapter.description(),
                backend = ?self.backend,
                "immersive background active"
            );
        }
        self.scheduler.start(software);
        self.reason = None;
        if let Some(source) = self.requested.clone() {
            self.loader.load(&source);
        }
        self.publish();
    }

    fn set_unavailable(&mut self, reason: UnavailableReason) {
        self.backend = Backend::Disabled;
        self.reason = Some(reason);
        self.scheduler.halt();
        self.publish();
    }

    /// Unmounts and releases every GPU object. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.teardown();
        self.surface = None;
        if self.reason != Some(UnavailableReason::Uninitialized) {
            self.set_unavailable(UnavailableReason::Uninitialized);
        }
    }

    fn teardown(&mut self) {
        self.loader.cancel_all();
        self.scheduler.halt();
        self.manager.destroy();
    }

    /// Requests `source` as the background artwork; only the latest request
    /// is ever displayed.
    pub fn set_source_image(&mut self, source: &str) {
        if self.manager.current_source() == Some(source) {
            // Already on screen; drop whatever was loading in the meantime.
            self.loader.cancel_all();
            self.requested = Some(source.to_string());
            return;
        }
        self.requested = Some(source.to_string());
        if self.manager.phase() == Phase::Ready {
            self.loader.load(source);
        } else {
            tracing::debug!(source, "deferring load until the context is ready");
        }
    }

    /// Whether the gate passes; says nothing about the current lifecycle.
    pub fn is_available(&self) -> bool {
        self.gate.evaluate(self.store.as_ref()).available
    }

    pub fn is_active(&self) -> bool {
        self.reason.is_none()
    }

    pub fn state(&self) -> ImmersiveState {
        match self.reason {
            Some(reason) => ImmersiveState::unavailable(reason),
            None => ImmersiveState::active(self.backend, self.metrics()),
        }
    }

    fn metrics(&self) -> Metrics {
        Metrics {
            fps: self.scheduler.fps(),
            last_frame: self.scheduler.last_frame_duration(),
            adapter: self
                .manager
                .adapter()
                .map(|adapter| adapter.description())
                .unwrap_or_default(),
            resident_textures: self.manager.resident_textures(),
            gpu_memory_bytes: self.manager.gpu_memory_bytes(),
        }
    }

    pub fn config(&self) -> &ImmersiveConfig {
        &self.config
    }

    /// Applies and persists a partial config update.
    pub fn set_config(&mut self, patch: &ConfigPatch) {
        let next = patch.apply(&self.config);
        if next == self.config {
            return;
        }
        if let Err(err) = save_config(self.store.as_mut(), &next) {
            tracing::warn!(error = %err, "failed to persist immersive config");
        }
        self.scheduler.set_target_fps(next.target_fps);
        self.scheduler.set_pause_when_hidden(next.pause_when_hidden);
        self.scheduler.request_immediate();
        self.manager.set_crossfade(next.crossfade);
        let reblur = next.blur_radius != self.config.blur_radius;
        self.loader.set_blur_sigma(next.blur_radius);
        self.config = next;
        tracing::debug!(config = ?self.config, "immersive config updated");

        if reblur && self.manager.phase() == Phase::Ready {
            if let Some(source) = self.requested.clone() {
                self.loader.load(&source);
            }
        }
    }

    /// Persists the runtime switch and tears down or re-initialises to match.
    pub fn set_enabled(&mut self, enabled: bool) {
        if let Err(err) = save_enabled(self.store.as_mut(), enabled) {
            tracing::warn!(error = %err, "failed to persist immersive.enabled");
        }
        if enabled {
            if self.reason == Some(UnavailableReason::RuntimeDisabled) {
                self.start();
            }
        } else if self.reason != Some(UnavailableReason::Uninitialized) {
            self.teardown();
            self.set_unavailable(UnavailableReason::RuntimeDisabled);
        }
    }

    /// Streams a snapshot on every lifecycle transition, starting with the
    /// current one.
    pub fn subscribe(&mut self) -> Receiver<ImmersiveState> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let _ = sender.send(self.state());
        self.subscribers.push(sender);
        receiver
    }

    fn publish(&mut self) {
        let state = self.state();
        self.subscribers
            .retain(|subscriber| subscriber.send(state.clone()).is_ok());
    }

    /// The host saw its surface change size.
    pub fn notify_resized(&mut self) {
        self.scheduler.request_immediate();
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.scheduler.set_visibility(visible) {
            tracing::debug!(visible, "surface visibility changed");
        }
    }

    /// The host revoked the GPU context.
    pub fn on_context_lost(&mut self) {
        if self.manager.phase() != Phase::Ready {
            tracing::debug!(phase = ?self.manager.phase(), "context loss ignored");
            return;
        }
        self.loader.cancel_all();
        self.manager.lose();
        tracing::warn!("immersive background lost its rendering context");
        self.set_unavailable(UnavailableReason::ContextLost);
    }

    /// The host can offer a context again after a loss.
    pub fn on_context_restored(&mut self, surface: Rc<dyn RenderSurface>) {
        if self.manager.phase() != Phase::Lost {
            tracing::debug!(phase = ?self.manager.phase(), "context restore ignored");
            return;
        }
        self.surface = Some(Rc::clone(&surface));
        match self.manager.restore(surface.as_ref()) {
            Ok(_) => {
                tracing::info!("immersive background restored");
                self.activate();
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to restore immersive background");
                self.set_unavailable(UnavailableReason::InitFailed);
            }
        }
    }

    /// Applies finished loads. Returns how many textures were swapped in.
    pub fn poll_loads(&mut self) -> usize {
        let completions = self.loader.poll();
        self.apply_completions(completions)
    }

    fn apply_completions(&mut self, completions: Vec<Completion>) -> usize {
        let mut swapped = 0;
        for Completion { ticket, result } in completions {
            if !self.loader.is_current(&ticket) {
                tracing::trace!(
                    source = %ticket.source,
                    generation = ticket.generation,
                    "discarding stale load"
                );
                continue;
            }
            match result {
                Ok(image) => {
                    match self.manager.swap_texture(&image, &ticket.source, Instant::now()) {
                        Ok(true) => {
                            swapped += 1;
                            self.scheduler.request_immediate();
                        }
                        Ok(false) => {}
                        Err(err) => tracing::warn!(
                            source = %ticket.source,
                            error = %err,
                            "failed to upload background texture"
                        ),
                    }
                }
                Err(LoadError::Aborted) => {
                    tracing::trace!(source = %ticket.source, "load aborted");
                }
                Err(err) => {
                    tracing::warn!(
                        source = %ticket.source,
                        generation = ticket.generation,
                        error = %err,
                        "failed to load background image"
                    );
                }
            }
        }
        swapped
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        self.is_active() && self.scheduler.ready_for_frame(now)
    }

    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if !self.is_active() {
            return None;
        }
        self.scheduler.next_deadline(now)
    }

    /// Draws one frame if one is due. Returns whether a frame was drawn.
    pub fn render_frame(&mut self, now: Instant) -> bool {
        if !self.ready_for_frame(now) {
            return false;
        }
        let Some(surface) = self.surface.clone() else {
            return false;
        };
        let overlay = self.config.debug_overlay.then(|| {
            self.scheduler.fps() / self.scheduler.effective_fps().max(1) as f32
        });
        let inputs = FrameInputs {
            now,
            time: now.saturating_duration_since(self.started).as_secs_f32(),
            motion_intensity: self.config.motion_intensity,
            overlay,
        };
        let began = Instant::now();
        match self.manager.render(surface.as_ref(), inputs) {
            Ok(()) => {
                self.scheduler.mark_rendered(now, began.elapsed());
                tracing::trace!(fps = self.scheduler.fps(), "frame rendered");
                true
            }
            Err(FrameError::Lost) => {
                self.on_context_lost();
                false
            }
            Err(FrameError::Skipped) => {
                tracing::trace!("frame skipped");
                self.scheduler.mark_skipped(now);
                false
            }
        }
    }

    #[cfg(test)]
    fn settle(&mut self, count: usize) -> usize {
        let completions = self.loader.wait(count, std::time::Duration::from_secs(5));
        assert_eq!(completions.len(), count, "loads did not finish in time");
        self.apply_completions(completions)
    }
}

impl Drop for Immersive {
    fn drop(&mut self) {
        self.teardown();
    }
}
