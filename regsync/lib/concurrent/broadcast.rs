use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{watch, Semaphore};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A wake-up channel for a fixed group of workers.
///
/// A worker that finds the task list empty parks on [`wait`](Self::wait).
/// Any worker that produces new tasks calls [`broadcast`](Self::broadcast),
/// which buffers up to one wake-up per subscriber so a park that races with
/// a broadcast is never missed. A controller observes the
/// [`all_parked`](Self::all_parked) watch; once every subscriber is parked
/// and no more work exists it calls [`close`](Self::close), after which
/// every current and future `wait` returns `true` (exit).
#[derive(Debug)]
pub struct BroadcastChan {
    subscriber_num: usize,
    wakeups: Semaphore,
    parked: AtomicUsize,
    all_parked_tx: watch::Sender<bool>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BroadcastChan {
    /// Creates a channel for `subscriber_num` workers.
    pub fn new(subscriber_num: usize) -> Self {
        let (all_parked_tx, _) = watch::channel(false);
        Self {
            subscriber_num,
            wakeups: Semaphore::new(0),
            parked: AtomicUsize::new(0),
            all_parked_tx,
        }
    }

    /// Parks the calling worker until a wake-up or until the channel is
    /// closed. Returns `true` when the channel was closed and the worker
    /// should exit.
    pub async fn wait(&self) -> bool {
        if self.parked.fetch_add(1, Ordering::AcqRel) + 1 == self.subscriber_num {
            self.all_parked_tx.send_replace(true);
        }

        let closed = match self.wakeups.acquire().await {
            Ok(permit) => {
                permit.forget();
                false
            }
            Err(_) => true,
        };

        self.parked.fetch_sub(1, Ordering::AcqRel);
        if !closed {
            self.all_parked_tx.send_replace(false);
        }

        closed
    }

    /// Wakes every parked worker, buffering wake-ups for workers that are
    /// about to park. At most one wake-up per subscriber is kept.
    pub fn broadcast(&self) {
        let available = self.wakeups.available_permits();
        if available < self.subscriber_num {
            self.wakeups.add_permits(self.subscriber_num - available);
        }
    }

    /// Closes the channel. Every parked worker wakes with an exit signal,
    /// and later waits return immediately.
    pub fn close(&self) {
        self.wakeups.close();
    }

    /// Returns a watch receiver that holds `true` while every subscriber is
    /// parked.
    pub fn all_parked(&self) -> watch::Receiver<bool> {
        self.all_parked_tx.subscribe()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn test_broadcast_chan_close_releases_waiters() {
        let chan = Arc::new(BroadcastChan::new(2));

        let waiter = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.wait().await })
        };

        // give the waiter time to park, then close
        tokio::time::sleep(Duration::from_millis(20)).await;
        chan.close();

        assert!(waiter.await.unwrap());
        assert!(chan.wait().await);
    }

    #[tokio::test]
    async fn test_broadcast_chan_broadcast_wakes_parked_worker() {
        let chan = Arc::new(BroadcastChan::new(1));

        let waiter = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        chan.broadcast();

        // woken by broadcast, not by close
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_chan_buffers_wakeup_before_park() {
        let chan = BroadcastChan::new(1);

        // broadcast before anyone parks; the wake-up must not be lost
        chan.broadcast();
        assert!(!chan.wait().await);
    }

    #[tokio::test]
    async fn test_broadcast_chan_all_parked_signal() {
        let chan = Arc::new(BroadcastChan::new(1));
        let mut all_parked = chan.all_parked();
        assert!(!*all_parked.borrow());

        let waiter = {
            let chan = chan.clone();
            tokio::spawn(async move { chan.wait().await })
        };

        all_parked.changed().await.unwrap();
        assert!(*all_parked.borrow());

        chan.close();
        assert!(waiter.await.unwrap());
    }
}
