//! Relay timestamp rebasing.
//!
//! The first observed timestamp of a relay run becomes the origin; every
//! emitted timestamp is `base + (observed - first_observed)`, where `base`
//! is the last absolute timestamp emitted before the run started. A relay
//! restart therefore never jumps further than real elapsed time.

/// Per-stream rebasing state.
#[derive(Debug, Clone, Default)]
pub struct TimestampRebaser {
    base: u32,
    first: Option<u32>,
    last: u32,
}

impl TimestampRebaser {
    /// Start a run that continues from absolute timestamp `base`.
    pub fn with_base(base: u32) -> Self {
        Self {
            base,
            first: None,
            last: base,
        }
    }

    /// Rebase one observed timestamp.
    ///
    /// Frames older than the run's first frame map to `base`; disorder is
    /// passed through, not reordered.
    pub fn rebase(&mut self, observed: u32) -> u32 {
        let first = *self.first.get_or_insert(observed);
        let abs = self.base.wrapping_add(observed.saturating_sub(first));
        self.last = abs;
        abs
    }

    /// Begin a new run (relay restart): the next frame continues from the
    /// last emitted absolute timestamp.
    pub fn restart(&mut self) {
        self.base = self.last;
        self.first = None;
    }

    /// Last absolute timestamp emitted (or the base if nothing was emitted).
    pub fn last(&self) -> u32 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_the_origin() {
        let mut r = TimestampRebaser::default();
        assert_eq!(r.rebase(5000), 0);
        assert_eq!(r.rebase(5040), 40);
        assert_eq!(r.last(), 40);
    }

    #[test]
    fn restart_continues_from_the_recorded_base() {
        let mut r = TimestampRebaser::default();
        r.rebase(100);
        r.rebase(1100);
        r.restart();

        let raw = [70_000u32, 70_000, 70_033, 70_066, 71_000];
        let out: Vec<u32> = raw.iter().map(|t| r.rebase(*t)).collect();
        assert_eq!(out, vec![1000, 1000, 1033, 1066, 2000]);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn late_frame_maps_to_the_base() {
        let mut r = TimestampRebaser::with_base(500);
        assert_eq!(r.rebase(200), 500);
        assert_eq!(r.rebase(150), 500);
        assert_eq!(r.rebase(260), 560);
    }
}
