//! Best-effort concurrent fan-out.
//!
//! Every task runs to completion regardless of the others; nothing is
//! cancelled or rolled back. The caller gets one outcome per task, in
//! submission order, and decides what to log.

use std::fmt::Display;
use std::future::Future;

use futures_util::future::join_all;

/// Result of one task in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub label: String,
    pub result: Result<(), String>,
}

/// Per-task results of a [`best_effort`] batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// `(label, error)` of every failed task.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.result {
            Ok(()) => None,
            Err(e) => Some((o.label.as_str(), e.as_str())),
        })
    }

    pub fn extend(&mut self, other: BatchReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// Run all tasks concurrently and collect every outcome.
pub async fn best_effort<F, T, E>(tasks: Vec<(String, F)>) -> BatchReport
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    best_effort_values(tasks).await.0
}

/// Like [`best_effort`], also handing back the value of every task that
/// succeeded (`None` where it failed), in submission order.
pub async fn best_effort_values<F, T, E>(tasks: Vec<(String, F)>) -> (BatchReport, Vec<Option<T>>)
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let (labels, futures): (Vec<String>, Vec<F>) = tasks.into_iter().unzip();
    let results = join_all(futures).await;

    let mut report = BatchReport::default();
    let mut values = Vec::with_capacity(results.len());
    for (label, result) in labels.into_iter().zip(results) {
        match result {
            Ok(value) => {
                values.push(Some(value));
                report.outcomes.push(TaskOutcome { label, result: Ok(()) });
            }
            Err(e) => {
                values.push(None);
                report.outcomes.push(TaskOutcome {
                    label,
                    result: Err(e.to_string()),
                });
            }
        }
    }
    (report, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Task = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

    #[tokio::test]
    async fn failures_do_not_cancel_siblings() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut tasks: Vec<(String, Task)> = Vec::new();
        for i in 0..4 {
            let ran = Arc::clone(&ran);
            tasks.push((
                format!("task-{i}"),
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    ran.fetch_add(1, Ordering::SeqCst);
                    if i == 1 { Err("boom".to_string()) } else { Ok(()) }
                }),
            ));
        }

        let report = best_effort(tasks).await;

        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(report.succeeded(), 3);
        assert!(!report.is_clean());
        assert_eq!(report.failures().collect::<Vec<_>>(), vec![("task-1", "boom")]);
        assert_eq!(report.outcomes[3].label, "task-3");
    }

    #[tokio::test]
    async fn values_line_up_with_outcomes() {
        let tasks: Vec<(String, Pin<Box<dyn Future<Output = Result<u32, String>> + Send>>)> = vec![
            ("a".to_string(), Box::pin(async { Ok(1) })),
            ("b".to_string(), Box::pin(async { Err("nope".to_string()) })),
            ("c".to_string(), Box::pin(async { Ok(3) })),
        ];

        let (report, values) = best_effort_values(tasks).await;

        assert_eq!(values, vec![Some(1), None, Some(3)]);
        assert_eq!(report.failures().collect::<Vec<_>>(), vec![("b", "nope")]);
    }

    #[tokio::test]
    async fn empty_batch_is_clean() {
        let report = best_effort(Vec::<(String, Task)>::new()).await;
        assert!(report.is_clean());
        assert_eq!(report.succeeded(), 0);
    }
}
