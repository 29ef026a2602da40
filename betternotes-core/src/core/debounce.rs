//! Trailing-edge debouncing on a worker thread, and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A cloneable cancellation flag shared between a caller and background work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum Message<T> {
    Push(T),
    Flush(Sender<()>),
    Stop,
}

/// Cancels a [`Debouncer`] from outside its owner.
pub struct DebounceHandle<T> {
    token: CancelToken,
    tx: Sender<Message<T>>,
}

impl<T> Clone for DebounceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> DebounceHandle<T> {
    /// Drops the pending value and stops the worker. No flush runs afterwards.
    pub fn cancel(&self) {
        self.token.cancel();
        let _ = self.tx.send(Message::Stop);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Buffers the latest pushed value and hands it to the flush callback once no
/// new value has arrived for `delay`.
///
/// Dropping the debouncer cancels it: a value still pending is discarded.
/// Use [`close`](Debouncer::close) to flush before shutting down.
pub struct Debouncer<T: Send + 'static> {
    tx: Sender<Message<T>>,
    token: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, flush: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let token = CancelToken::new();
        let worker_token = token.clone();
        let worker = thread::spawn(move || run_worker(rx, delay, worker_token, flush));
        Self {
            tx,
            token,
            worker: Some(worker),
        }
    }

    /// Replaces the pending value and restarts the quiescence window.
    pub fn push(&self, value: T) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Message::Push(value));
    }

    /// Flushes the pending value, if any, and waits for the callback to return.
    pub fn flush_now(&self) {
        if self.token.is_cancelled() {
            return;
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(Message::Flush(ack_tx)).is_ok() {
            // An Err means the worker stopped before acknowledging.
            let _ = ack_rx.recv();
        }
    }

    pub fn handle(&self) -> DebounceHandle<T> {
        DebounceHandle {
            token: self.token.clone(),
            tx: self.tx.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Flushes the pending value, then stops the worker and waits for it.
    pub fn close(mut self) {
        self.flush_now();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        let _ = self.tx.send(Message::Stop);
        if let Some(worker) = self.worker.take() {
            // Never join from inside the flush callback.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<T, F>(rx: Receiver<Message<T>>, delay: Duration, token: CancelToken, mut flush: F)
where
    F: FnMut(T),
{
    let mut pending: Option<T> = None;
    loop {
        let message = if pending.is_some() {
            match rx.recv_timeout(delay) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        break;
                    }
                    if let Some(value) = pending.take() {
                        flush(value);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            }
        };

        if token.is_cancelled() {
            break;
        }
        match message {
            Message::Push(value) => pending = Some(value),
            Message::Flush(ack) => {
                if let Some(value) = pending.take() {
                    flush(value);
                }
                let _ = ack.send(());
            }
            Message::Stop => break,
        }
    }
}
