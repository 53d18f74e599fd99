//! Binary wake signal shared between the dispatcher and its workers.

use std::sync::{Condvar, Mutex};

/// A one-place mailbox: `post` latches a wake, `wait` blocks until a post
/// has occurred since the last wait. A post before the matching wait
/// never deadlocks, repeated posts collapse into one, and spurious
/// condvar wakeups are absorbed internally.
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Latch a wake and notify one waiter.
    pub fn post(&self) {
        let mut posted = self.flag.lock().unwrap();
        *posted = true;
        self.cond.notify_one();
    }

    /// Block until a post has occurred since the last wait, then consume it.
    pub fn wait(&self) {
        let mut posted = self.flag.lock().unwrap();
        while !*posted {
            posted = self.cond.wait(posted).unwrap();
        }
        *posted = false;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Signal::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn post_before_wait_does_not_block() {
        let signal = Signal::new();
        signal.post();
        signal.wait();
    }

    #[test]
    fn repeated_posts_collapse() {
        let signal = Signal::new();
        signal.post();
        signal.post();
        signal.wait();
        // The second wait must block until a fresh post arrives.
        let signal = Arc::new(signal);
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(20));
        signal.post();
        waiter.join().unwrap();
    }

    #[test]
    fn wakes_a_blocked_waiter() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(10));
        signal.post();
        waiter.join().unwrap();
    }
}
