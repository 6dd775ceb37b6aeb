use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use immersive::{Immersive, ImmersiveState, RenderSurface, UnavailableReason, WindowSurface};
use tracing_subscriber::EnvFilter;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoopBuilder};
use winit::window::WindowBuilder;

use crate::cli::RunArgs;
use crate::fetch::SourceFetcher;
use crate::paths::AppPaths;
use crate::prefs::open_store;

/// Delay between a context loss and the restore attempt.
const RESTORE_DELAY: Duration = Duration::from_secs(1);
/// How often finished loads are collected while nothing else wakes the loop.
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(args: RunArgs, paths: &AppPaths) -> Result<()> {
    let store = open_store(paths)?;
    let fetcher = Arc::new(SourceFetcher::new()?);
    let mut immersive = Immersive::new(Box::new(store), fetcher);
    let patch = args.config_patch();
    if !patch.is_empty() {
        immersive.set_config(&patch);
    }

    let event_loop = EventLoopBuilder::new()
        .build()
        .map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let (width, height) = args.size;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("ambientview")
            .with_inner_size(PhysicalSize::new(width, height))
            .build(&event_loop)
            .map_err(|err| anyhow!("failed to create window: {err}"))?,
    );
    let window_id = window.id();
    let surface: Rc<dyn RenderSurface> = Rc::new(WindowSurface::new(Arc::clone(&window)));

    let states = immersive.subscribe();
    immersive.init(Rc::clone(&surface));

    let mut playlist = SourceCycle::new(args.sources, args.interval, Instant::now());
    if let Some(source) = playlist.current() {
        immersive.set_source_image(source);
    }
    let mut restore_at: Option<Instant> = None;

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent {
                window_id: id,
                event,
            } if id == window_id => match event {
                WindowEvent::CloseRequested => {
                    immersive.destroy();
                    elwt.exit();
                }
                WindowEvent::Resized(_) => {
                    immersive.notify_resized();
                    window.request_redraw();
                }
                WindowEvent::Occluded(occluded) => immersive.set_visible(!occluded),
                WindowEvent::RedrawRequested => {
                    immersive.render_frame(Instant::now());
                }
                _ => {}
            },
            Event::Suspended => immersive.on_context_lost(),
            Event::AboutToWait => {
                let now = Instant::now();
                immersive.poll_loads();

                if let Some(source) = playlist.advance_if_due(now) {
                    tracing::debug!(source, "cycling background");
                    immersive.set_source_image(source);
                }

                for state in states.try_iter() {
                    report_state(&state);
                    if state.unavailable_reason == Some(UnavailableReason::ContextLost) {
                        restore_at = Some(now + RESTORE_DELAY);
                    }
                }
                if restore_at.is_some_and(|at| now >= at) {
                    restore_at = None;
                    immersive.on_context_restored(Rc::clone(&surface));
                }

                if immersive.ready_for_frame(now) {
                    window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Wait);
                    return;
                }
                let wake = [
                    immersive.next_deadline(now),
                    playlist.next_change(),
                    restore_at,
                    Some(now + LOAD_POLL_INTERVAL),
                ]
                .into_iter()
                .flatten()
                .min();
                match wake {
                    Some(deadline) => elwt.set_control_flow(ControlFlow::WaitUntil(deadline)),
                    None => elwt.set_control_flow(ControlFlow::Wait),
                }
            }
            _ => {}
        })
        .map_err(|err| anyhow!("event loop error: {err}"))
}

fn report_state(state: &ImmersiveState) {
    match state.unavailable_reason {
        None => tracing::info!(
            backend = ?state.backend,
            adapter = state.metrics.as_ref().map(|m| m.adapter.as_str()).unwrap_or("unknown"),
            "ambient background running"
        ),
        Some(UnavailableReason::Uninitialized) => {}
        Some(reason) => {
            tracing::info!(%reason, "ambient background unavailable; showing a static background");
        }
    }
}

/// Rotates through the configured sources on a fixed interval.
#[derive(Debug)]
struct SourceCycle {
    sources: Vec<String>,
    index: usize,
    interval: Duration,
    shown_at: Instant,
}

impl SourceCycle {
    fn new(sources: Vec<String>, interval: Duration, now: Instant) -> Self {
        Self {
            sources,
            index: 0,
            interval,
            shown_at: now,
        }
    }

    fn current(&self) -> Option<&str> {
        self.sources.get(self.index).map(String::as_str)
    }

    fn cycles(&self) -> bool {
        self.sources.len() > 1 && !self.interval.is_zero()
    }

    fn next_change(&self) -> Option<Instant> {
        self.cycles().then(|| self.shown_at + self.interval)
    }

    fn advance_if_due(&mut self, now: Instant) -> Option<&str> {
        if !self.cycles() || now.saturating_duration_since(self.shown_at) < self.interval {
            return None;
        }
        self.index = (self.index + 1) % self.sources.len();
        self.shown_at = now;
        self.current()
    }
}
