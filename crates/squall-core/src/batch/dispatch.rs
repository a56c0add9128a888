//! Dispatching batch jobs sequentially or across a bounded worker pool.
//!
//! # Scheduling
//!
//! When there are fewer jobs than worker slots, jobs run one after another
//! in partition order and the first failure is returned immediately. Later
//! jobs are never started. A panicking job counts as a failure.
//!
//! Otherwise each job is spawned as its own tokio task with at most
//! `parallelism` in flight. Every spawned job is awaited to a terminal
//! outcome before `dispatch` returns, even after a failure has been seen.
//! All failures are reported ordered by batch id, not by when they were
//! observed.
//!
//! Already-submitted batches are never rolled back.

use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::emit;
use crate::metrics::events::{BatchFailed, BatchFailureKind, BatchRetried, BatchSubmitted};

use super::partition::Batch;
use super::progress::Progress;
use super::retry::{RetryError, RetryPolicy, Transient, retry_with};

/// Destination that accepts whole batches.
///
/// Implementations own their client handle and resolved destination, so a
/// job needs nothing else to submit.
#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    type Item: Send + Sync + 'static;
    type Error: Transient + std::error::Error + Send + Sync + 'static;

    /// Label used in logs and metrics (queue or bucket name).
    fn target(&self) -> &str;

    /// Submit every entry of `batch` in one call.
    async fn submit(&self, batch: &Batch<Self::Item>) -> Result<(), Self::Error>;
}

/// A batch bound to its destination and retry policy.
pub struct Job<S: BatchSink> {
    batch: Batch<S::Item>,
    sink: Arc<S>,
    policy: RetryPolicy,
}

impl<S: BatchSink> fmt::Debug for Job<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("batch", &self.batch.id)
            .field("items", &self.batch.len())
            .field("target", &self.sink.target())
            .finish()
    }
}

impl<S: BatchSink> Job<S> {
    pub fn new(batch: Batch<S::Item>, sink: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            batch,
            sink,
            policy,
        }
    }

    pub fn batch_id(&self) -> usize {
        self.batch.id
    }

    /// Submit the batch under the retry policy, consuming the job.
    pub async fn run(self) -> Result<JobReport, JobFailure<S::Error>> {
        let Job {
            batch,
            sink,
            policy,
        } = self;
        let target = sink.target().to_string();
        let sink = &*sink;
        let batch = &batch;

        let result = retry_with(
            &policy,
            move |_| sink.submit(batch),
            |_, _| {
                emit!(BatchRetried {
                    target: target.clone(),
                })
            },
        )
        .await;

        match result {
            Ok(retried) => {
                emit!(BatchSubmitted {
                    items: batch.len(),
                    target: target.clone(),
                });
                debug!(
                    target = %target,
                    batch = batch.id,
                    items = batch.len(),
                    attempts = retried.attempts,
                    "Batch submitted"
                );
                Ok(JobReport {
                    batch: batch.id,
                    items: batch.len(),
                    attempts: retried.attempts,
                })
            }
            Err(source) => {
                let kind = if source.is_exhausted() {
                    BatchFailureKind::Exhausted
                } else {
                    BatchFailureKind::Fatal
                };
                emit!(BatchFailed { kind, target });
                Err(JobFailure::Failed {
                    batch: batch.id,
                    source,
                })
            }
        }
    }
}

/// Terminal success of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub batch: usize,
    pub items: usize,
    pub attempts: u32,
}

impl JobReport {
    /// Number of delays slept before the batch went through.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Terminal failure of one job.
#[derive(Debug)]
pub enum JobFailure<E> {
    /// The submission failed fatally or ran out of attempts.
    Failed { batch: usize, source: RetryError<E> },
    /// The worker task panicked before reaching an outcome.
    Panicked { batch: usize, message: String },
}

impl<E> JobFailure<E> {
    pub fn batch(&self) -> usize {
        match self {
            Self::Failed { batch, .. } | Self::Panicked { batch, .. } => *batch,
        }
    }

    /// The submission error, if the job got far enough to produce one.
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Failed { source, .. } => Some(source.last_error()),
            Self::Panicked { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for JobFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { batch, source } => write!(f, "batch {batch} {source}"),
            Self::Panicked { batch, message } => write!(f, "batch {batch} panicked: {message}"),
        }
    }
}

impl<E> std::error::Error for JobFailure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Panicked { .. } => None,
        }
    }
}

/// Result of a fully successful dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// One report per batch, ordered by batch id.
    pub reports: Vec<JobReport>,
}

impl DispatchSummary {
    pub fn batches(&self) -> usize {
        self.reports.len()
    }

    pub fn items(&self) -> usize {
        self.reports.iter().map(|r| r.items).sum()
    }

    pub fn attempts(&self) -> u32 {
        self.reports.iter().map(|r| r.attempts).sum()
    }
}

/// One or more jobs failed.
#[derive(Debug)]
pub struct DispatchError<E> {
    /// Failures ordered by batch id; never empty.
    pub failures: Vec<JobFailure<E>>,
    /// Jobs that did succeed, ordered by batch id.
    pub completed: Vec<JobReport>,
}

impl<E> DispatchError<E> {
    /// The failure with the lowest batch id.
    pub fn first(&self) -> Option<&JobFailure<E>> {
        self.failures.first()
    }
}

impl<E: fmt::Display> fmt::Display for DispatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first() {
            Some(first) if self.failures.len() > 1 => write!(
                f,
                "{} batches failed ({} succeeded), first: {first}",
                self.failures.len(),
                self.completed.len()
            ),
            Some(first) => write!(f, "{first}"),
            None => write!(f, "dispatch failed"),
        }
    }
}

impl<E> std::error::Error for DispatchError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.first()
            .map(|failure| failure as &(dyn std::error::Error + 'static))
    }
}

/// Number of worker slots the host offers.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Runs jobs to completion and aggregates their outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatcher {
    parallelism: usize,
    retry: RetryPolicy,
    progress: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(default_parallelism(), RetryPolicy::default())
    }
}

impl Dispatcher {
    pub fn new(parallelism: usize, retry: RetryPolicy) -> Self {
        Self {
            parallelism: parallelism.max(1),
            retry,
            progress: true,
        }
    }

    /// Enable or disable progress logging.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Bind each batch to `sink` under this dispatcher's retry policy.
    pub fn jobs<S: BatchSink>(&self, sink: Arc<S>, batches: Vec<Batch<S::Item>>) -> Vec<Job<S>> {
        batches
            .into_iter()
            .map(|batch| Job::new(batch, sink.clone(), self.retry))
            .collect()
    }

    /// Build jobs for `batches` and dispatch them.
    pub async fn run<S: BatchSink>(
        &self,
        sink: Arc<S>,
        batches: Vec<Batch<S::Item>>,
    ) -> Result<DispatchSummary, DispatchError<S::Error>> {
        self.dispatch(self.jobs(sink, batches)).await
    }

    /// Execute every job to a terminal outcome. See the module docs for the
    /// sequential and pooled paths.
    pub async fn dispatch<S: BatchSink>(
        &self,
        jobs: Vec<Job<S>>,
    ) -> Result<DispatchSummary, DispatchError<S::Error>> {
        let total = jobs.len();
        let Some(target) = jobs.first().map(|job| job.sink.target().to_string()) else {
            return Ok(DispatchSummary::default());
        };
        let progress = Progress::new(target.clone(), total, self.progress);

        if total < self.parallelism {
            debug!(target = %target, jobs = total, "Dispatching sequentially");
            return Self::run_sequential(jobs, &target, &progress).await;
        }

        debug!(
            target = %target,
            jobs = total,
            workers = self.parallelism,
            "Dispatching across worker pool"
        );
        let mut reports = Vec::with_capacity(total);
        let mut failures = Vec::new();

        let mut outcomes = stream::iter(jobs)
            .map(|job| {
                let batch = job.batch_id();
                let handle = tokio::spawn(job.run());
                async move { (batch, handle.await) }
            })
            .buffer_unordered(self.parallelism);

        while let Some((batch, joined)) = outcomes.next().await {
            progress.tick();
            match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(failure)) => {
                    warn!(target = %target, "Batch failed: {failure}");
                    failures.push(failure);
                }
                Err(e) => {
                    let message = match e.try_into_panic() {
                        Ok(payload) => panic_message(&*payload),
                        Err(e) => e.to_string(),
                    };
                    failures.push(panicked(&target, batch, message));
                }
            }
        }

        reports.sort_by_key(|r| r.batch);
        if failures.is_empty() {
            info!(target = %target, batches = total, "All batches submitted");
            return Ok(DispatchSummary { reports });
        }

        failures.sort_by_key(JobFailure::batch);
        Err(DispatchError {
            failures,
            completed: reports,
        })
    }

    async fn run_sequential<S: BatchSink>(
        jobs: Vec<Job<S>>,
        target: &str,
        progress: &Progress,
    ) -> Result<DispatchSummary, DispatchError<S::Error>> {
        let mut reports = Vec::with_capacity(jobs.len());

        for job in jobs {
            let batch = job.batch_id();
            let outcome = match FutureExt::catch_unwind(AssertUnwindSafe(job.run())).await {
                Ok(outcome) => outcome,
                Err(payload) => Err(panicked(target, batch, panic_message(&*payload))),
            };
            progress.tick();
            match outcome {
                Ok(report) => reports.push(report),
                Err(failure) => {
                    warn!("Batch failed, abandoning remaining batches: {failure}");
                    return Err(DispatchError {
                        failures: vec![failure],
                        completed: reports,
                    });
                }
            }
        }

        Ok(DispatchSummary { reports })
    }
}

fn panicked<E>(target: &str, batch: usize, message: String) -> JobFailure<E> {
    warn!(target = %target, batch, "Batch worker panicked: {message}");
    emit!(BatchFailed {
        kind: BatchFailureKind::Panicked,
        target: target.to_string(),
    });
    JobFailure::Panicked { batch, message }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
