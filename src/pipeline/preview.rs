//! Single-slot background runner for preview uploads
//!
//! At most one job runs at a time and at most one waits behind it. Starting a
//! new job while another is still waiting replaces the waiting one, so a slow
//! preview client only ever sees the freshest frame and never makes work pile
//! up behind it.

use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct PreviewRunner {
    tx: Option<Sender<Job>>,
    rx: Receiver<Job>,
    handle: Option<JoinHandle<()>>,
}

impl PreviewRunner {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (tx, rx) = flume::bounded::<Job>(1);
        let jobs = rx.clone();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(job) = jobs.recv() {
                job();
            }
        })?;

        Ok(Self {
            tx: Some(tx),
            rx,
            handle: Some(handle),
        })
    }

    /// Queue `job`, replacing a job that has not started yet.
    ///
    /// Returns `true` if a waiting job was discarded.
    pub fn start<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };

        let mut job: Job = Box::new(job);
        let mut replaced = false;
        loop {
            match tx.try_send(job) {
                Ok(()) => return replaced,
                Err(TrySendError::Full(rejected)) => {
                    replaced |= self.rx.try_recv().is_ok();
                    job = rejected;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("Preview runner stopped, dropping job");
                    return replaced;
                }
            }
        }
    }
}

impl Drop for PreviewRunner {
    fn drop(&mut self) {
        // Discard whatever has not started, then let the thread drain out.
        while self.rx.try_recv().is_ok() {}
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Preview job panicked");
            }
        }
    }
}
