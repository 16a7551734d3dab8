use std::time::{Duration, Instant};

/// Default quiet interval between a keystroke burst and propagation.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Coalesces whole-buffer text replacements into one downstream propagation.
///
/// Submitting newer text supersedes the pending one outright; only the latest
/// buffer matters, so there is no cancellation bookkeeping beyond overwriting
/// the slot and restarting the deadline.
#[derive(Debug)]
pub struct Debouncer {
    interval: Duration,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    text: String,
    deadline: Instant,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
        }
    }

    /// Queues `text`, replacing any not-yet-released buffer and restarting
    /// the quiet interval.
    pub fn submit(&mut self, text: String, now: Instant) {
        self.pending = Some(Pending {
            text,
            deadline: now + self.interval,
        });
    }

    /// Releases the pending buffer once the quiet interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        if self.pending.as_ref()?.deadline > now {
            return None;
        }
        self.pending.take().map(|pending| pending.text)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_text_until_the_quiet_interval_elapses() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        debouncer.submit("a".into(), start);

        assert_eq!(debouncer.poll(start + Duration::from_millis(100)), None);
        assert!(debouncer.is_pending());
        assert_eq!(
            debouncer.poll(start + Duration::from_millis(500)),
            Some("a".into())
        );
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn newer_text_supersedes_the_pending_buffer() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        debouncer.submit("first".into(), start);
        debouncer.submit("second".into(), start + Duration::from_millis(200));

        // The first buffer's deadline passes without a release.
        assert_eq!(debouncer.poll(start + Duration::from_millis(600)), None);
        assert_eq!(
            debouncer.poll(start + Duration::from_millis(700)),
            Some("second".into())
        );
    }

    #[test]
    fn poll_without_submission_is_empty() {
        let mut debouncer = Debouncer::new(DEFAULT_DEBOUNCE);
        assert_eq!(debouncer.poll(Instant::now()), None);
    }
}
