//! Idle/wake timer for continuous mode.
//!
//! At most one timer is outstanding. Arming replaces the previous timer; a
//! timer that fires clears itself from the slot *before* it requests a
//! dispatch cycle, so the next timer can only be armed by that cycle.
//!
//! Timers are plain tokio tasks parked in `sleep`. The runtime does not wait
//! for them on shutdown, so an armed timer never keeps the process alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::dispatcher::CycleRequest;
use super::lock_unpoisoned;

#[derive(Debug)]
struct Armed {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub(crate) struct WakeTimer {
    slot: Arc<Mutex<Option<Armed>>>,
    next_id: AtomicU64,
}

impl WakeTimer {
    /// Arm a one-shot timer that sends [`CycleRequest::Wake`] after `delay`.
    pub(crate) fn arm(&self, delay: Duration, requests: mpsc::Sender<CycleRequest>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::clone(&self.slot);

        // Held across the spawn so a zero-delay timer cannot look for its own
        // entry before it is stored.
        let mut armed = lock_unpoisoned(&self.slot);
        if let Some(previous) = armed.take() {
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut armed = lock_unpoisoned(&slot);
                if armed.as_ref().is_some_and(|current| current.id == id) {
                    armed.take();
                }
            }
            let _ = requests.try_send(CycleRequest::Wake);
        });
        *armed = Some(Armed { id, handle });
    }

    /// Cancel the outstanding timer, if any. Returns whether one was armed.
    pub(crate) fn disarm(&self) -> bool {
        match lock_unpoisoned(&self.slot).take() {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        lock_unpoisoned(&self.slot).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    #[tokio::test]
    async fn firing_disarms_then_requests_one_cycle() {
        let (tx, mut rx) = mpsc::channel(1);
        let timer = WakeTimer::default();

        timer.arm(Duration::from_millis(10), tx);
        assert!(timer.is_armed());

        let request = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(request, Some(CycleRequest::Wake));
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn rearming_replaces_the_outstanding_timer() {
        let (tx, mut rx) = mpsc::channel(4);
        let timer = WakeTimer::default();

        timer.arm(Duration::from_millis(30), tx.clone());
        timer.arm(Duration::from_millis(30), tx);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(rx.try_recv(), Ok(CycleRequest::Wake));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn disarmed_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel(1);
        let timer = WakeTimer::default();

        timer.arm(Duration::from_millis(20), tx);
        assert!(timer.disarm());
        assert!(!timer.disarm());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}
