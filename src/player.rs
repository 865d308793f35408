use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// The media element a session keeps in sync.
pub trait Player: Send {
    /// Position in seconds.
    fn current_time(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, time: f64);
}

/// Builds the player for a session key.
pub type PlayerFactory = Arc<dyn Fn(&str) -> Box<dyn Player> + Send + Sync>;

/// A position that advances with the monotonic clock while playing.
#[derive(Debug, Clone)]
pub struct MediaClock {
    position: f64,
    paused: bool,
    anchor: Instant,
}

impl Default for MediaClock {
    fn default() -> Self {
        MediaClock {
            position: 0.0,
            paused: true,
            anchor: Instant::now(),
        }
    }
}

impl MediaClock {
    fn settle(&mut self) {
        self.position = self.current_time();
        self.anchor = Instant::now();
    }
}

impl Player for MediaClock {
    fn current_time(&self) -> f64 {
        if self.paused {
            self.position
        } else {
            self.position + self.anchor.elapsed().as_secs_f64()
        }
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn play(&mut self) {
        self.settle();
        self.paused = false;
    }

    fn pause(&mut self) {
        self.settle();
        self.paused = true;
    }

    fn seek(&mut self, time: f64) {
        self.position = time.max(0.0);
        self.anchor = Instant::now();
    }
}

/// A `MediaClock` that both the session and a local UI can drive.
#[derive(Debug, Clone, Default)]
pub struct SharedClock(Arc<Mutex<MediaClock>>);

impl SharedClock {
    fn with<R>(&self, f: impl FnOnce(&mut MediaClock) -> R) -> R {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut *guard)
    }
}

impl Player for SharedClock {
    fn current_time(&self) -> f64 {
        self.with(|clock| clock.current_time())
    }

    fn is_paused(&self) -> bool {
        self.with(|clock| clock.is_paused())
    }

    fn play(&mut self) {
        self.with(|clock| clock.play())
    }

    fn pause(&mut self) {
        self.with(|clock| clock.pause())
    }

    fn seek(&mut self, time: f64) {
        self.with(|clock| clock.seek(time))
    }
}
