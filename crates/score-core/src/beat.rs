use crate::constants::BEATS_PER_BAR;

/// A detected beat boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Beat {
    /// Position in the 4/4 bar after advancing (0..4).
    pub index: u8,
    pub time: f64,
}

/// Polled beat counter.
///
/// The clock is checked at a coarse fixed cadence instead of being scheduled
/// on exact beat boundaries, so tempo may change freely between beats. A late
/// poll advances at most one beat; owed beats are dropped, not replayed.
#[derive(Clone, Debug)]
pub struct BeatClock {
    index: u8,
    last_beat_at: f64,
}

impl BeatClock {
    pub fn new(now: f64) -> Self {
        Self {
            index: 0,
            last_beat_at: now,
        }
    }

    /// Advance one beat if a full `beat_duration` has elapsed since the last.
    pub fn poll(&mut self, now: f64, beat_duration: f64) -> Option<Beat> {
        if now - self.last_beat_at < beat_duration {
            return None;
        }
        self.index = (self.index + 1) % BEATS_PER_BAR;
        self.last_beat_at = now;
        Some(Beat {
            index: self.index,
            time: now,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn last_beat_at(&self) -> f64 {
        self.last_beat_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_once_per_beat_at_poll_cadence() {
        let mut clock = BeatClock::new(0.0);
        let mut beats = 0;
        let poll = 1.0 / 60.0;
        let mut t = 0.0;
        for _ in 0..(60 * 4) {
            t += poll;
            if clock.poll(t, 1.0).is_some() {
                beats += 1;
            }
        }
        // Polling granularity can push the fourth beat just past the window.
        assert!((3..=4).contains(&beats), "got {beats} beats in 4s at 60 BPM");
    }

    #[test]
    fn wraps_bar_position() {
        let mut clock = BeatClock::new(0.0);
        let seen: Vec<u8> = (1..=5)
            .filter_map(|i| clock.poll(i as f64, 1.0).map(|b| b.index))
            .collect();
        assert_eq!(seen, vec![1, 2, 3, 0, 1]);
    }

    #[test]
    fn late_poll_does_not_catch_up() {
        let mut clock = BeatClock::new(0.0);
        assert!(clock.poll(10.0, 0.5).is_some());
        assert_eq!(clock.index(), 1);
        assert!(clock.poll(10.01, 0.5).is_none());
        assert_eq!(clock.last_beat_at(), 10.0);
    }

    #[test]
    fn tempo_change_applies_to_pending_beat() {
        let mut clock = BeatClock::new(0.0);
        assert!(clock.poll(0.6, 1.0).is_none());
        assert!(clock.poll(0.6, 0.5).is_some());
    }
}
