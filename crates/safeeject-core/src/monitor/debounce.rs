/// Coalesces bursts of signals into one delayed callback.
///
/// Each signal (re)starts the quiet period; the callback fires once the
/// period elapses with no further signal, receiving the last payload of the
/// burst. Dropping or stopping the debouncer discards a pending burst.
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

pub struct Debouncer<T: Send + 'static> {
    tx: Option<Sender<T>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Start the debounce thread.
    pub fn spawn<F>(delay: Duration, mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = unbounded::<T>();

        let thread = thread::Builder::new()
            .name("safeeject-debounce".to_owned())
            .spawn(move || {
                // Wait for the first signal of a burst.
                while let Ok(mut last) = rx.recv() {
                    let mut coalesced = 1u32;
                    loop {
                        match rx.recv_timeout(delay) {
                            Ok(next) => {
                                last = next;
                                coalesced += 1;
                            }
                            Err(RecvTimeoutError::Timeout) => {
                                debug!("Debounce: firing after {coalesced} signal(s)");
                                callback(last);
                                break;
                            }
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Record a signal. Never blocks.
    pub fn signal(&self, payload: T) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(payload);
        }
    }

    /// A sender that feeds this debouncer, for producers on other threads.
    pub fn sender(&self) -> Option<Sender<T>> {
        self.tx.clone()
    }

    /// Stop the thread, dropping any pending burst.
    ///
    /// Blocks until every sender handed out by [`Debouncer::sender`] has
    /// been dropped as well.
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
