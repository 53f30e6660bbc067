//! Ordered handler collections used for resource notifications.
//!
//! An [`Executor`] runs its handlers synchronously, in registration order,
//! followed by its post-handlers. Executors can be chained: executors linked
//! with [`Executor::before`] run first, executors linked with
//! [`Executor::next`] run after this one's own handlers.
//!
//! Handlers are snapshotted before they run, so a handler may add or remove
//! handlers (or trigger other executors) without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Identifier returned by `add_handler`, used to remove the handler later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    fn next() -> Self {
        HandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Handlers<T> {
    handlers: Vec<(HandlerId, Handler<T>)>,
    post_handlers: Vec<(HandlerId, Handler<T>)>,
    before: Vec<Executor<T>>,
    next: Vec<Executor<T>>,
}

/// Shared, clonable collection of notification handlers.
pub struct Executor<T> {
    inner: Arc<Mutex<Handlers<T>>>,
}

impl<T> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Executor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Executor<T> {
    pub fn new() -> Self {
        Executor {
            inner: Arc::new(Mutex::new(Handlers {
                handlers: Vec::new(),
                post_handlers: Vec::new(),
                before: Vec::new(),
                next: Vec::new(),
            })),
        }
    }

    pub fn add_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId::next();
        self.lock().handlers.push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns false if it was not registered here.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.handlers.len() + handlers.post_handlers.len();
        handlers.handlers.retain(|(h, _)| *h != id);
        handlers.post_handlers.retain(|(h, _)| *h != id);
        before != handlers.handlers.len() + handlers.post_handlers.len()
    }

    /// Add a handler that runs after all regular handlers and `next` links.
    pub fn add_post_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = HandlerId::next();
        self.lock().post_handlers.push((id, Arc::new(handler)));
        id
    }

    /// Run `executor` before this executor's handlers.
    pub fn before(&self, executor: &Executor<T>) -> &Self {
        self.lock().before.push(executor.clone());
        self
    }

    /// Run `executor` after this executor's handlers.
    pub fn next(&self, executor: &Executor<T>) -> &Self {
        self.lock().next.push(executor.clone());
        self
    }

    pub fn len(&self) -> usize {
        let handlers = self.lock();
        handlers.handlers.len() + handlers.post_handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every handler with `data`.
    pub fn execute(&self, data: &T) {
        let (before, handlers, next, post_handlers) = {
            let handlers = self.lock();
            (
                handlers.before.clone(),
                handlers.handlers.clone(),
                handlers.next.clone(),
                handlers.post_handlers.clone(),
            )
        };

        for executor in &before {
            executor.execute(data);
        }
        for (_, handler) in &handlers {
            handler(data);
        }
        for executor in &next {
            executor.execute(data);
        }
        for (_, handler) in &post_handlers {
            handler(data);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Handlers<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: 'static> Default for Executor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&u32) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &str| {
            let log = Arc::clone(&log_clone);
            let name = name.to_string();
            Box::new(move |value: &u32| {
                log.lock().unwrap().push(format!("{}:{}", name, value));
            }) as Box<dyn Fn(&u32) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let executor = Executor::new();
        let (log, make) = recorder();

        executor.add_post_handler(make("post"));
        executor.add_handler(make("first"));
        executor.add_handler(make("second"));
        executor.execute(&7);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:7", "second:7", "post:7"]
        );
    }

    #[test]
    fn test_remove_handler() {
        let executor = Executor::new();
        let (log, make) = recorder();

        let id = executor.add_handler(make("gone"));
        executor.add_handler(make("kept"));
        assert!(executor.remove_handler(id));
        assert!(!executor.remove_handler(id));

        executor.execute(&1);
        assert_eq!(*log.lock().unwrap(), vec!["kept:1"]);
        assert_eq!(executor.len(), 1);
    }

    #[test]
    fn test_chained_executors() {
        let main = Executor::new();
        let before = Executor::new();
        let after = Executor::new();
        let (log, make) = recorder();

        before.add_handler(make("before"));
        after.add_handler(make("next"));
        main.add_handler(make("main"));
        main.add_post_handler(make("post"));
        main.before(&before).next(&after);

        main.execute(&2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:2", "main:2", "next:2", "post:2"]
        );
    }

    #[test]
    fn test_handler_may_register_handlers() {
        let executor: Executor<u32> = Executor::new();
        let inner = executor.clone();
        executor.add_handler(move |_| {
            inner.add_handler(|_| {});
        });

        executor.execute(&0);
        assert_eq!(executor.len(), 2);
    }
}
