//! Per-thread liveness and cancellation.
//!
//! Every thread lazily owns a liveness token and a cancellation flag. A
//! `ThreadHandle` observes both from elsewhere: the token dies with the
//! thread's locals, the flag is raised by `interrupt()` and checked
//! cooperatively at suspension points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crate::error::CoreError;

struct ThreadContext {
    alive: Arc<()>,
    interrupted: Arc<AtomicBool>,
}

thread_local! {
    static CURRENT: ThreadContext = ThreadContext {
        alive: Arc::new(()),
        interrupted: Arc::new(AtomicBool::new(false)),
    };
}

/// Observer of one thread's liveness and cancellation flag
#[derive(Debug, Clone)]
pub struct ThreadHandle {
    id: ThreadId,
    name: Option<String>,
    alive: Weak<()>,
    interrupted: Arc<AtomicBool>,
}

impl ThreadHandle {
    /// Handle of the calling thread
    pub fn current() -> Self {
        let thread = thread::current();
        CURRENT.with(|context| Self {
            id: thread.id(),
            name: thread.name().map(str::to_string),
            alive: Arc::downgrade(&context.alive),
            interrupted: context.interrupted.clone(),
        })
    }

    /// Thread id
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Thread name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// False once the thread exited
    pub fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }

    /// Raise the cancellation flag
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Is the cancellation flag raised?
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// True if this handle observes the calling thread
    pub fn is_current(&self) -> bool {
        self.id == thread::current().id()
    }
}

/// Is the calling thread's cancellation flag raised?
pub fn is_interrupted() -> bool {
    CURRENT.with(|context| context.interrupted.load(Ordering::SeqCst))
}

/// Lower the calling thread's cancellation flag, returning its previous value
pub fn clear_interrupt() -> bool {
    CURRENT.with(|context| context.interrupted.swap(false, Ordering::SeqCst))
}

/// `Err(CoreError::Interrupted)` if the calling thread was interrupted
pub fn check_interrupted() -> Result<(), CoreError> {
    if is_interrupted() {
        Err(CoreError::Interrupted(format!(
            "thread {:?} was interrupted",
            thread::current().id()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_observes_current_thread() {
        let handle = ThreadHandle::current();
        assert!(handle.is_alive());
        assert!(handle.is_current());
        assert!(!handle.is_interrupted());
        assert!(check_interrupted().is_ok());

        handle.interrupt();
        assert!(is_interrupted());
        assert!(check_interrupted().unwrap_err().is_interrupted());
        assert!(clear_interrupt());
        assert!(!handle.is_interrupted());
    }

    #[test]
    fn test_handle_detects_thread_exit() {
        let handle = thread::Builder::new()
            .name("short-lived".to_string())
            .spawn(ThreadHandle::current)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(handle.name(), Some("short-lived"));
        assert!(!handle.is_alive());
        assert!(!handle.is_current());
    }

    #[test]
    fn test_interrupt_reaches_other_thread() {
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = thread::spawn(move || {
            tx.send(ThreadHandle::current()).unwrap();
            while !is_interrupted() {
                thread::yield_now();
            }
            check_interrupted()
        });

        let handle = rx.recv().unwrap();
        handle.interrupt();
        assert!(worker.join().unwrap().is_err());
    }
}
