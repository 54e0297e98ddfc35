use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const NOT_FED: u64 = u64::MAX;

/// Detects a stalled capture stream: if no frame feeds the watchdog for the
/// configured timeout, it trips and stays tripped until the next feed.
#[derive(Clone)]
pub struct WatchdogTimer {
    timeout: Duration,
    epoch: Instant,
    last_feed_ms: Arc<AtomicU64>,
    triggered: Arc<AtomicBool>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl WatchdogTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            epoch: Instant::now(),
            last_feed_ms: Arc::new(AtomicU64::new(NOT_FED)),
            triggered: Arc::new(AtomicBool::new(false)),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn start(&self, running: Arc<AtomicBool>) {
        let timeout_ms = self.timeout.as_millis() as u64;
        let epoch = self.epoch;
        let last_feed_ms = Arc::clone(&self.last_feed_ms);
        let triggered = Arc::clone(&self.triggered);

        last_feed_ms.store(epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
        triggered.store(false, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-watchdog".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_secs(1));

                    let last = last_feed_ms.load(Ordering::SeqCst);
                    if last == NOT_FED {
                        continue;
                    }
                    let now_ms = epoch.elapsed().as_millis() as u64;
                    let elapsed = now_ms.saturating_sub(last);
                    if elapsed > timeout_ms && !triggered.swap(true, Ordering::SeqCst) {
                        tracing::error!("Watchdog timeout: no audio data for {}ms", elapsed);
                    }
                }
            });

        match handle {
            Ok(h) => *self.handle.lock() = Some(h),
            Err(e) => tracing::error!("Failed to spawn watchdog thread: {}", e),
        }
    }

    /// Called from the audio callback on every buffer.
    pub fn feed(&self) {
        self.last_feed_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::SeqCst);
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.triggered.store(false, Ordering::SeqCst);
        self.last_feed_ms.store(NOT_FED, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_clears_trigger() {
        let wd = WatchdogTimer::new(Duration::from_secs(5));
        wd.triggered.store(true, Ordering::SeqCst);
        assert!(wd.is_triggered());
        wd.feed();
        assert!(!wd.is_triggered());
    }

    #[test]
    fn trips_after_timeout_without_feeds() {
        let wd = WatchdogTimer::new(Duration::from_millis(100));
        let running = Arc::new(AtomicBool::new(true));
        wd.start(running.clone());

        // Monitor polls at 1 Hz, so give it a bit over one cycle.
        thread::sleep(Duration::from_millis(1300));
        assert!(wd.is_triggered());

        running.store(false, Ordering::SeqCst);
        wd.stop();
    }
}
