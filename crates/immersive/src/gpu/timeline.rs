use std::time::{Duration, Instant};

fn smoothstep(t: f32) -> f32 {
    let clamped = t.clamp(0.0, 1.0);
    clamped * clamped * (3.0 - 2.0 * clamped)
}

/// Opacity ramp of the incoming texture while the outgoing one is still drawn.
#[derive(Debug)]
pub(crate) struct FadeEnvelope {
    start: Instant,
    duration: Duration,
}

impl FadeEnvelope {
    pub fn new(duration: Duration, now: Instant) -> Option<Self> {
        if duration.is_zero() {
            None
        } else {
            Some(Self {
                start: now,
                duration,
            })
        }
    }

    /// Returns the incoming opacity and whether the fade has completed.
    pub fn progress(&self, now: Instant) -> (f32, bool) {
        let elapsed = now.saturating_duration_since(self.start);
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32().max(f32::EPSILON);
        (smoothstep(t), t >= 1.0)
    }
}
