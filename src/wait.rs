use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep of a background worker.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Sleep until `deadline`, waking early once `shutdown` is set.
///
/// Returns true if shutdown was requested.
pub(crate) fn sleep_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::Acquire) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep((deadline - now).min(WAIT_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn sleep_runs_to_deadline() {
        let flag = AtomicBool::new(false);
        let start = Instant::now();
        assert!(!sleep_until(start + Duration::from_millis(20), &flag));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn shutdown_interrupts_sleep() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = {
            let flag = flag.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                flag.store(true, Ordering::Release);
            })
        };
        let start = Instant::now();
        assert!(sleep_until(start + Duration::from_secs(30), &flag));
        assert!(start.elapsed() < Duration::from_secs(5));
        setter.join().unwrap();
    }
}
