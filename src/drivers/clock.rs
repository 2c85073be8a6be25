use std::time::Instant;
#[cfg(test)]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(test)]
use std::time::Duration;

/// Time source for sample timestamps and liveness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock driven by the test. With a non-zero `tick`, every `now()` call advances it.
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
    tick: Duration,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self::ticking(start, Duration::ZERO)
    }

    pub fn ticking(start: Instant, tick: Duration) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
            tick,
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let now = *current;
        *current += self.tick;
        now
    }
}
