//! Fork a known set of operations, wait for all of them, collect errors.
//!
//! One scoped thread per task. There is no cancellation: a failing task
//! never stops its siblings, and nothing is returned until every task has
//! finished. Errors arrive on a shared channel in completion order; each
//! call site picks how many of them it keeps.

use std::sync::mpsc;
use std::thread;

/// A unit of work borrowed for the lifetime of one phase.
pub type Task<'a, E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'a>;

/// Box a closure as a [`Task`].
pub fn task<'a, E, F>(f: F) -> Task<'a, E>
where
    F: FnOnce() -> Result<(), E> + Send + 'a,
{
    Box::new(f)
}

/// Run every task to completion and return all errors, in completion order.
pub fn join_all<'a, E: Send>(tasks: Vec<Task<'a, E>>) -> Vec<E> {
    let (tx, rx) = mpsc::channel();

    thread::scope(|s| {
        for t in tasks {
            let tx = tx.clone();
            s.spawn(move || {
                if let Err(e) = t() {
                    // The receiver outlives the scope, so this cannot fail.
                    let _ = tx.send(e);
                }
            });
        }
    });

    drop(tx);
    rx.into_iter().collect()
}

/// Run every task to completion; fail with the first error reported.
pub fn join_first_error<'a, E: Send>(tasks: Vec<Task<'a, E>>) -> Result<(), E> {
    match join_all(tasks).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_all_tasks_run_even_after_failure() {
        let finished = AtomicUsize::new(0);
        let tasks: Vec<Task<'_, String>> = vec![
            task(|| Err("fast failure".to_string())),
            task(|| {
                thread::sleep(Duration::from_millis(50));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            task(|| {
                thread::sleep(Duration::from_millis(20));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ];

        let errors = join_all(tasks);
        assert_eq!(errors, ["fast failure"]);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_join_all_collects_every_error() {
        let tasks: Vec<Task<'_, usize>> = (0..8)
            .map(|i| task(move || if i % 2 == 0 { Err(i) } else { Ok(()) }))
            .collect();

        let mut errors = join_all(tasks);
        errors.sort();
        assert_eq!(errors, [0, 2, 4, 6]);
    }

    #[test]
    fn test_join_first_error() {
        let ok: Vec<Task<'_, &str>> = vec![task(|| Ok(())), task(|| Ok(()))];
        assert!(join_first_error(ok).is_ok());

        let failing: Vec<Task<'_, &str>> = vec![task(|| Ok(())), task(|| Err("keyring"))];
        assert_eq!(join_first_error(failing), Err("keyring"));
    }

    #[test]
    fn test_empty_task_list() {
        let tasks: Vec<Task<'_, ()>> = Vec::new();
        assert!(join_all(tasks).is_empty());
    }
}
