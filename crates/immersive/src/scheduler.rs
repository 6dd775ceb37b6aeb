use std::time::{Duration, Instant};

/// Frame-rate ceiling applied when the adapter is a software rasterizer.
pub const SOFTWARE_FPS_CAP: u32 = 15;

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Rolling frame statistics over a one-second window.
#[derive(Debug, Default)]
struct FrameStats {
    window_start: Option<Instant>,
    frames_in_window: u32,
    fps: f32,
    last_frame: Duration,
}

impl FrameStats {
    fn record(&mut self, now: Instant, duration: Duration) {
        self.last_frame = duration;
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            return;
        };
        self.frames_in_window += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= FPS_WINDOW {
            self.fps = self.frames_in_window as f32 / elapsed.as_secs_f32();
            self.frames_in_window = 0;
            self.window_start = Some(now);
            tracing::debug!(fps = self.fps.round(), "render stats");
        }
    }
}

/// Decides when the next frame is due.
///
/// The scheduler never renders itself; the host asks [`ready_for_frame`] and
/// sleeps until [`next_deadline`].
///
/// [`ready_for_frame`]: FrameScheduler::ready_for_frame
/// [`next_deadline`]: FrameScheduler::next_deadline
#[derive(Debug)]
pub struct FrameScheduler {
    target_fps: u32,
    software: bool,
    running: bool,
    visible: bool,
    pause_when_hidden: bool,
    redraw_requested: bool,
    last_frame: Option<Instant>,
    stats: FrameStats,
}

impl FrameScheduler {
    pub fn new(target_fps: u32, pause_when_hidden: bool) -> Self {
        Self {
            target_fps: target_fps.max(1),
            software: false,
            running: false,
            visible: true,
            pause_when_hidden,
            redraw_requested: false,
            last_frame: None,
            stats: FrameStats::default(),
        }
    }

    pub fn start(&mut self, software: bool) {
        self.running = true;
        self.software = software;
        self.last_frame = None;
        self.redraw_requested = true;
        self.stats = FrameStats::default();
        tracing::debug!(fps = self.effective_fps(), software, "frame loop started");
    }

    pub fn halt(&mut self) {
        if self.running {
            tracing::debug!("frame loop halted");
        }
        self.running = false;
        self.redraw_requested = false;
    }

    pub fn set_target_fps(&mut self, target_fps: u32) {
        self.target_fps = target_fps.max(1);
    }

    pub fn set_pause_when_hidden(&mut self, pause: bool) {
        self.pause_when_hidden = pause;
    }

    /// Returns true when the visibility actually changed.
    pub fn set_visibility(&mut self, visible: bool) -> bool {
        if self.visible == visible {
            return false;
        }
        self.visible = visible;
        if visible {
            self.redraw_requested = true;
        }
        true
    }

    pub fn request_immediate(&mut self) {
        self.redraw_requested = true;
    }

    pub fn effective_fps(&self) -> u32 {
        if self.software {
            self.target_fps.min(SOFTWARE_FPS_CAP)
        } else {
            self.target_fps
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.effective_fps()))
    }

    fn paused(&self) -> bool {
        !self.running || (self.pause_when_hidden && !self.visible)
    }

    pub fn ready_for_frame(&self, now: Instant) -> bool {
        if self.paused() {
            return false;
        }
        if self.redraw_requested {
            return true;
        }
        match self.last_frame {
            Some(last) => now.saturating_duration_since(last) >= self.interval(),
            None => true,
        }
    }

    /// When the next frame becomes due; `None` while paused.
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if self.paused() {
            return None;
        }
        if self.redraw_requested {
            return Some(now);
        }
        Some(match self.last_frame {
            Some(last) => (last + self.interval()).max(now),
            None => now,
        })
    }

    pub fn mark_rendered(&mut self, started: Instant, duration: Duration) {
        self.last_frame = Some(started);
        self.redraw_requested = false;
        self.stats.record(started, duration);
    }

    /// A due frame produced nothing; wait a full interval before retrying
    /// instead of asking again immediately.
    pub fn mark_skipped(&mut self, now: Instant) {
        self.last_frame = Some(now);
        self.redraw_requested = false;
    }

    pub fn fps(&self) -> f32 {
        self.stats.fps
    }

    pub fn last_frame_duration(&self) -> Duration {
        self.stats.last_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn idle_until_started() {
        let scheduler = FrameScheduler::new(30, true);
        let now = Instant::now();
        assert!(!scheduler.ready_for_frame(now));
        assert_eq!(scheduler.next_deadline(now), None);
    }

    #[test]
    fn respects_target_interval() {
        let mut scheduler = FrameScheduler::new(30, true);
        let start = Instant::now();
        scheduler.start(false);
        assert!(scheduler.ready_for_frame(start));
        scheduler.mark_rendered(start, ms(2));
        assert!(!scheduler.ready_for_frame(start + ms(20)));
        assert!(scheduler.ready_for_frame(start + ms(34)));
        let deadline = scheduler.next_deadline(start + ms(5)).expect("deadline");
        assert_eq!(deadline, start + scheduler.interval());
    }

    #[test]
    fn hidden_surface_pauses_until_visible() {
        let mut scheduler = FrameScheduler::new(30, true);
        let start = Instant::now();
        scheduler.start(false);
        scheduler.mark_rendered(start, ms(1));
        assert!(scheduler.set_visibility(false));

        let issued = (1..=30)
            .map(|step| start + ms(step * 40))
            .filter(|now| scheduler.ready_for_frame(*now))
            .count();
        assert_eq!(issued, 0);
        assert_eq!(scheduler.next_deadline(start + ms(100)), None);

        assert!(scheduler.set_visibility(true));
        assert!(scheduler.ready_for_frame(start + ms(1300)));
    }

    #[test]
    fn hidden_surface_keeps_rendering_without_pause_flag() {
        let mut scheduler = FrameScheduler::new(30, false);
        let start = Instant::now();
        scheduler.start(false);
        scheduler.mark_rendered(start, ms(1));
        scheduler.set_visibility(false);
        assert!(scheduler.ready_for_frame(start + ms(40)));
    }

    #[test]
    fn software_adapter_is_capped() {
        let mut scheduler = FrameScheduler::new(60, true);
        scheduler.start(true);
        assert_eq!(scheduler.effective_fps(), SOFTWARE_FPS_CAP);
        scheduler.set_target_fps(10);
        assert_eq!(scheduler.effective_fps(), 10);
    }

    #[test]
    fn halt_stops_frames_and_immediate_requests() {
        let mut scheduler = FrameScheduler::new(60, true);
        scheduler.start(false);
        scheduler.halt();
        scheduler.request_immediate();
        assert!(!scheduler.ready_for_frame(Instant::now()));
    }

    #[test]
    fn skipped_frame_defers_to_next_interval() {
        let mut scheduler = FrameScheduler::new(20, true);
        let start = Instant::now();
        scheduler.start(false);
        scheduler.request_immediate();
        scheduler.mark_skipped(start);
        assert!(!scheduler.ready_for_frame(start + ms(1)));
        assert_eq!(
            scheduler.next_deadline(start + ms(1)),
            Some(start + scheduler.interval())
        );
        assert_eq!(scheduler.fps(), 0.0);
    }

    #[test]
    fn fps_estimate_updates_after_a_window() {
        let mut scheduler = FrameScheduler::new(60, true);
        let start = Instant::now();
        scheduler.start(false);
        for frame in 0..=20 {
            scheduler.mark_rendered(start + ms(frame * 50), ms(3));
        }
        assert!((scheduler.fps() - 20.0).abs() < 0.5, "fps {}", scheduler.fps());
        assert_eq!(scheduler.last_frame_duration(), ms(3));
    }
}
