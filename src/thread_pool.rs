//! A module for thread pool.
use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, mpsc},
    thread::{self},
};

use crate::error::Result;

/// A trait for thread pools.
///
/// This trait defines the interface for thread pools.
///
pub trait ThreadPool: Sized {
    /// Create a new thread pool.
    fn new(threads: u32) -> Result<Self>;
    /// Spawn a new job on the thread pool.
    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static;
}

/// A job is a function that can be executed by a thread.
type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    NewJob(Job),
    Terminate,
}

/// Workers pulling jobs from one shared queue.
pub struct SharedQueueThreadPool {
    workers: Vec<Worker>,
    sender: mpsc::Sender<Message>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..threads.max(1))
            .map(|id| Worker::new(id, receiver.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { workers, sender })
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Message::NewJob(Box::new(job)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "thread pool is gone"))?;
        Ok(())
    }
}

impl Drop for SharedQueueThreadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            // A send only fails once every worker has exited already.
            let _ = self.sender.send(Message::Terminate);
        }

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if let Err(e) = thread.join() {
                    log::error!("worker {} join failed: {:?}", worker.id, e);
                }
            }
        }
    }
}

struct Worker {
    id: u32,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: u32, receiver: Arc<Mutex<mpsc::Receiver<Message>>>) -> Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("lockcenter-worker-{id}"))
            .spawn(move || {
                loop {
                    let msg = {
                        let receiver = receiver.lock().unwrap_or_else(|p| p.into_inner());
                        receiver.recv()
                    };
                    match msg {
                        Ok(Message::NewJob(job)) => {
                            if let Err(e) = catch_unwind(AssertUnwindSafe(job)) {
                                log::error!("worker {id} job panicked: {e:?}");
                            }
                        }
                        Ok(Message::Terminate) | Err(_) => break,
                    }
                }
            })?;
        Ok(Self {
            id,
            thread: Some(thread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_job_before_drop_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = SharedQueueThreadPool::new(4).unwrap();
        for _ in 0..32 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn survives_a_panicking_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = SharedQueueThreadPool::new(1).unwrap();
        pool.spawn(|| panic!("boom")).unwrap();
        let after = counter.clone();
        pool.spawn(move || {
            after.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
