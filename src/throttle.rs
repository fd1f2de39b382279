//! Rate limiting for progress notifications.
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default spacing between two emitted progress updates.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Lets at most one update through per interval. The update that reaches the
/// total always passes, so consumers never miss completion.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Whether the update `current / total` should be forwarded now.
    pub fn should_emit(&self, current: usize, total: usize) -> bool {
        let now = Instant::now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = match *last {
            None => true,
            Some(prev) => now.duration_since(prev) >= self.min_interval,
        };
        if due || current >= total {
            *last = Some(now);
            return true;
        }
        false
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_passes_then_burst_is_dropped() {
        let t = ProgressThrottle::new(Duration::from_secs(60));
        assert!(t.should_emit(1, 10));
        assert!(!t.should_emit(2, 10));
        assert!(!t.should_emit(3, 10));
    }

    #[test]
    fn final_update_always_passes() {
        let t = ProgressThrottle::new(Duration::from_secs(60));
        assert!(t.should_emit(1, 10));
        assert!(t.should_emit(10, 10));
    }

    #[test]
    fn updates_pass_again_after_interval() {
        let t = ProgressThrottle::new(Duration::from_millis(10));
        assert!(t.should_emit(1, 10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(t.should_emit(2, 10));
    }
}
