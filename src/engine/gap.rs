use chrono::{DateTime, Duration, Utc};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Whether a candidate timestamp is still due at `now`.
///
/// `now - candidate` is split into whole days (floored, negative when the
/// candidate is in the future) and whole seconds within the day. The candidate
/// is due only while days > -1 and seconds > 0, so a gap that is an exact
/// multiple of 24 hours (or under one second) is not due.
pub fn is_due(candidate: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let gap_ms = (now - candidate).num_milliseconds();
    let days = gap_ms.div_euclid(MILLIS_PER_DAY);
    let seconds = gap_ms.rem_euclid(MILLIS_PER_DAY) / 1000;
    days > -1 && seconds > 0
}

/// Walks forward one interval at a time from a checkpoint timestamp,
/// yielding every timestamp that is still due.
#[derive(Debug, Clone)]
pub struct GapEnumerator {
    next: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: Duration,
    exhausted: bool,
}

impl GapEnumerator {
    pub fn new(checkpoint: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            next: checkpoint + interval,
            now,
            interval,
            exhausted: interval <= Duration::zero(),
        }
    }
}

impl Iterator for GapEnumerator {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let candidate = self.next;
        if !is_due(candidate, self.now) {
            self.exhausted = true;
            return None;
        }
        self.next = candidate + self.interval;
        Some(candidate)
    }
}

impl std::iter::FusedIterator for GapEnumerator {}
