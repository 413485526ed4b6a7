use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Sender};
use tracing::{debug, warn};

use crate::error::CompositorError;

pub(crate) const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_nanos(16_666_667);

/// Dedicated thread that fires once per display refresh.
///
/// Each tick is reported as seconds since `epoch`. Dropping or stopping the
/// link joins the thread, so no tick starts after [`DisplayLink::stop`]
/// returns, except when stop is called from the tick callback itself; the
/// thread then exits after the current tick.
pub struct DisplayLink {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl DisplayLink {
    pub fn start<F>(interval: Duration, epoch: Instant, mut on_tick: F) -> Result<Self, CompositorError>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let interval = if interval.is_zero() {
            DEFAULT_REFRESH_INTERVAL
        } else {
            interval
        };
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let ticker = crossbeam_channel::tick(interval);
        let handle = thread::Builder::new()
            .name("worldview-display-link".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_secs_f64() * 1000.0, "display link started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> fired => match fired {
                            Ok(at) => on_tick(at.saturating_duration_since(epoch).as_secs_f64()),
                            Err(_) => break,
                        },
                    }
                }
                debug!("display link stopped");
            })
            .map_err(|err| {
                CompositorError::Initialization(format!("failed to spawn display link thread: {err}"))
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel and wakes the thread.
        drop(self.stop.take());
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("display link stopped from its own tick; detaching");
            return;
        }
        if handle.join().is_err() {
            warn!("display link thread panicked");
        }
    }
}

impl Drop for DisplayLink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let mut link = DisplayLink::start(Duration::from_millis(2), Instant::now(), move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .expect("link starts");

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        link.stop();
        assert!(!link.is_running());

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn timestamps_are_monotonic_seconds() {
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = stamps.clone();
        let mut link = DisplayLink::start(Duration::from_millis(1), Instant::now(), move |t| {
            sink.lock().unwrap().push(t);
        })
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while stamps.lock().unwrap().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        link.stop();
        let stamps = stamps.lock().unwrap();
        assert!(stamps.windows(2).all(|pair| pair[1] >= pair[0]));
        assert!(stamps.iter().all(|t| *t >= 0.0 && *t < 5.0));
    }

    #[test]
    fn zero_interval_uses_default_refresh() {
        let link = DisplayLink::start(Duration::ZERO, Instant::now(), |_| {}).unwrap();
        assert_eq!(link.interval(), DEFAULT_REFRESH_INTERVAL);
    }
}
