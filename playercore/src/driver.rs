//! Background thread driving a controller.
//!
//! Hosts with their own event loop call
//! [`PlaybackController::run_pending`] themselves. Everyone else starts a
//! [`PlaybackDriver`], which calls it at a fixed tick (or sooner when the
//! poll timer is due) until stopped.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use playerconfig::Config;
use tracing::{debug, warn};

use crate::controller::PlaybackController;

pub struct PlaybackDriver {
    controller: Arc<Mutex<PlaybackController>>,
    tick: Duration,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackDriver {
    pub fn new(controller: Arc<Mutex<PlaybackController>>, tick: Duration) -> Self {
        Self {
            controller,
            tick,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Uses `driver.tick_ms` from the configuration.
    pub fn from_config(controller: Arc<Mutex<PlaybackController>>, config: &Config) -> Self {
        Self::new(controller, config.get_driver_tick())
    }

    pub fn controller(&self) -> &Arc<Mutex<PlaybackController>> {
        &self.controller
    }

    /// Starts the driver thread. Calling it while running is a no-op.
    pub fn start(&self) -> io::Result<()> {
        let mut handle_guard = self.handle.lock().expect("Driver handle mutex poisoned");
        if handle_guard.is_some() {
            return Ok(());
        }

        self.stop_flag.store(false, Ordering::SeqCst);

        let controller = Arc::clone(&self.controller);
        let stop_flag = Arc::clone(&self.stop_flag);
        let tick = self.tick;
        let name = {
            let controller = controller.lock().expect("Controller mutex poisoned");
            format!("playback-{}", controller.id())
        };

        debug!(thread = name.as_str(), tick_ms = tick.as_millis() as u64, "Starting playback driver");
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || drive(controller, tick, stop_flag))?;
        *handle_guard = Some(handle);
        Ok(())
    }

    /// Stops the driver thread and waits for it to exit. Idempotent.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let mut handle_guard = self.handle.lock().expect("Driver handle mutex poisoned");
        if let Some(handle) = handle_guard.take() {
            debug!("Stopping playback driver");
            let name = handle.thread().name().unwrap_or("playback").to_string();
            if handle.join().is_err() {
                warn!(thread = name.as_str(), "Playback driver thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .expect("Driver handle mutex poisoned")
            .is_some()
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drive(controller: Arc<Mutex<PlaybackController>>, tick: Duration, stop_flag: Arc<AtomicBool>) {
    while !stop_flag.load(Ordering::SeqCst) {
        let deadline = {
            let mut controller = controller.lock().expect("Controller mutex poisoned");
            controller.run_pending();
            controller.next_deadline()
        };

        let wait = match deadline {
            Some(due) => due.saturating_duration_since(Instant::now()).min(tick),
            None => tick,
        };
        thread::sleep(wait.max(Duration::from_millis(1)));
    }
    debug!("Playback driver exiting");
}
