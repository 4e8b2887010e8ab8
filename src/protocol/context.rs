use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use log::info;

type Waker = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    terminated: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// Process-wide termination signal shared by sockets, the relay and workers.
///
/// Blocking calls cannot observe a flag, so every component that blocks registers a waker
/// that knocks it loose. [`terminate`](Context::terminate) sets the flag first and then
/// runs every waker once.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("context terminated");
        if let Ok(wakers) = self.inner.wakers.lock() {
            for wake in wakers.iter() {
                wake();
            }
        }
    }

    /// Registers `waker` to run on termination, or runs it right away if that already
    /// happened.
    pub(crate) fn on_terminate(&self, waker: impl Fn() + Send + Sync + 'static) {
        let Ok(mut wakers) = self.inner.wakers.lock() else {
            return;
        };
        if self.is_terminated() {
            drop(wakers);
            waker();
        } else {
            wakers.push(Box::new(waker));
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
