/// Reserves back-to-back playback slots on the output clock.
///
/// Incoming chunks always extend from the end of the previous slot rather than
/// from "now", so arrival jitter never opens gaps or overlaps between chunks.
/// Only the session dispatcher writes to it.
#[derive(Debug, Default, Clone)]
pub struct PlaybackScheduler {
    next_free_slot: f64,
}

impl PlaybackScheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_free_slot: 0.0,
        }
    }

    /// Reserve a slot of `duration` seconds and return its start time.
    pub fn schedule_chunk(&mut self, duration: f64, now: f64) -> f64 {
        let start = self.next_free_slot.max(now);
        self.next_free_slot = start + duration.max(0.0);
        start
    }

    /// Whether scheduled audio is still playing at `now`.
    ///
    /// Checked when a chunk finishes playing. A finished chunk can race with
    /// one that is about to be scheduled, so the flag may briefly read false
    /// between chunks.
    #[must_use]
    pub fn is_speaking_now(&self, now: f64) -> bool {
        now < self.next_free_slot
    }

    #[must_use]
    pub const fn next_free_slot(&self) -> f64 {
        self.next_free_slot
    }

    pub const fn reset(&mut self) {
        self.next_free_slot = 0.0;
    }
}
