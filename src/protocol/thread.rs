use std::{io, sync::Arc, thread};

use log::{debug, warn};

use super::transaction::WorkerId;

/// Fixed set of long-running worker threads. Each thread runs the same body once, for as
/// long as it likes; dropping the pool waits for all of them.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new<F>(size: usize, body: F) -> io::Result<Self>
    where
        F: Fn(WorkerId) + Send + Sync + 'static,
    {
        assert!(size > 0);

        let body = Arc::new(body);
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            workers.push(Worker::new(WorkerId(i), Arc::clone(&body))?);
        }

        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: WorkerId,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new<F>(id: WorkerId, body: Arc<F>) -> io::Result<Self>
    where
        F: Fn(WorkerId) + Send + Sync + 'static,
    {
        let thread = thread::Builder::new()
            .name(format!("worker-{id}"))
            .spawn(move || {
                debug!("worker {id} started");
                body(id);
                debug!("worker {id} exited");
            })?;

        Ok(Self { id, thread })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    };

    use super::*;

    #[test]
    fn every_worker_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let pool = WorkerPool::new(4, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(pool.len(), 4);
        drop(pool);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn workers_share_a_queue() {
        let (sender, receiver) = mpsc::channel::<usize>();
        let receiver = Arc::new(Mutex::new(receiver));
        let total = Arc::new(AtomicUsize::new(0));
        let sum = Arc::clone(&total);

        let pool = WorkerPool::new(3, move |_| {
            loop {
                let job = receiver.lock().unwrap().recv();
                match job {
                    Ok(n) => {
                        sum.fetch_add(n, Ordering::SeqCst);
                    }
                    Err(_) => break,
                }
            }
        })
        .unwrap();

        for n in 1..=10 {
            sender.send(n).unwrap();
        }
        drop(sender);
        drop(pool);
        assert_eq!(total.load(Ordering::SeqCst), 55);
    }

    #[test]
    #[should_panic]
    fn empty_pool() {
        let _ = WorkerPool::new(0, |_| {});
    }
}
