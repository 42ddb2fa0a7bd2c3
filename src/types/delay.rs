use chrono::{DateTime, Duration, Utc};

/// When a pushed job should become visible to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Relative delay in seconds
    Seconds(u64),

    /// Absolute point in time
    Until(DateTime<Utc>),
}

impl Delay {
    /// No delay - the job is visible immediately
    pub fn none() -> Self {
        Self::Seconds(0)
    }

    /// Seconds from `now` until the delay elapses.
    ///
    /// Absolute times already in the past clamp to zero; relative counts are
    /// returned unchanged.
    pub fn as_seconds(&self, now: DateTime<Utc>) -> u64 {
        match self {
            Self::Seconds(seconds) => *seconds,
            Self::Until(at) => (at.timestamp() - now.timestamp()).max(0) as u64,
        }
    }

    /// The instant at which the job becomes visible
    pub fn available_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.as_seconds(now) as i64)
    }

    /// Check whether the delay has already elapsed relative to `now`
    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.as_seconds(now) == 0
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::none()
    }
}

impl From<u64> for Delay {
    fn from(seconds: u64) -> Self {
        Self::Seconds(seconds)
    }
}

impl From<DateTime<Utc>> for Delay {
    fn from(at: DateTime<Utc>) -> Self {
        Self::Until(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_future_time_returns_remaining_seconds() {
        let now = Utc::now();
        let delay = Delay::Until(now + Duration::seconds(60));

        assert_eq!(delay.as_seconds(now), 60);
    }

    #[test]
    fn absolute_past_time_clamps_to_zero() {
        let now = Utc::now();
        let delay = Delay::Until(now - Duration::seconds(60));

        assert_eq!(delay.as_seconds(now), 0);
        assert!(delay.is_elapsed(now));
    }

    #[test]
    fn relative_seconds_pass_through_unchanged() {
        let now = Utc::now();

        assert_eq!(Delay::Seconds(30).as_seconds(now), 30);
        assert_eq!(Delay::from(30u64), Delay::Seconds(30));
    }

    #[test]
    fn available_at_offsets_from_now() {
        let now = Utc::now();
        let delay = Delay::Seconds(90);

        assert_eq!(delay.available_at(now), now + Duration::seconds(90));
    }
}
