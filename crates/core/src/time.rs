use chrono::{DateTime, Utc};

/// Injected clock so services and tests agree on what "now" means.
///
/// The engine never calls `Utc::now()` directly: a fixed clock makes every
/// timer computation deterministic under test.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock frozen at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// The current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }
}

/// Returns a deterministic `DateTime<Utc>` for tests (2024-03-01T00:00:00Z).
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_709_251_200, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` frozen at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_its_timestamp() {
        let at = fixed_now();
        assert_eq!(Clock::fixed(at).now(), at);
    }

    #[test]
    fn default_clock_tracks_real_time() {
        let clock = Clock::default_clock();
        let before = Utc::now();
        let observed = clock.now();
        assert!(observed >= before);
    }
}
