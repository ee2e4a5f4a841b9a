use chrono::{DateTime, Utc};

/// Represents an entity responsible for providing dates across application. Tracking statistics
/// depend on "now", so tests substitute their own implementation.
pub trait Clock: Sync + Send + 'static {
    fn time(&self) -> DateTime<Utc>;
}

pub struct DefaultClock;

impl Clock for DefaultClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_clock {
    use chrono::{DateTime, Utc};

    use super::Clock;

    /// Frozen clock.
    #[derive(Clone)]
    pub struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn time(&self) -> DateTime<Utc> {
            self.0
        }
    }
}
