//! Ordered, bounded teardown.
//!
//! Steps run one after another, each raced against the same timeout. A
//! step that fails or times out is recorded and the next step runs anyway;
//! a timed-out step's future is dropped, not awaited further.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{error, info};

type StepFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    #[error("shutdown step '{step}' failed: {reason}")]
    Failed { step: &'static str, reason: String },

    #[error("shutdown step '{step}' timed out after {timeout:?}")]
    TimedOut {
        step: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug)]
pub struct StepOutcome {
    pub name: &'static str,
    pub result: Result<(), ShutdownError>,
}

#[derive(Debug, Default)]
pub struct ShutdownOutcome {
    pub steps: Vec<StepOutcome>,
}

impl ShutdownOutcome {
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|step| step.result.is_ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &ShutdownError> {
        self.steps.iter().filter_map(|step| step.result.as_ref().err())
    }

    /// Process exit code: 0 if every step completed, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() { 0 } else { 1 }
    }
}

pub struct ShutdownOrchestrator {
    step_timeout: Duration,
    steps: Vec<(&'static str, StepFuture)>,
}

impl ShutdownOrchestrator {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            step_timeout,
            steps: Vec::new(),
        }
    }

    /// Append a step. Steps run in the order they were added.
    pub fn step<F, E>(mut self, name: &'static str, task: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.steps
            .push((name, Box::pin(async move { task.await.map_err(|e| e.to_string()) })));
        self
    }

    pub async fn run(self) -> ShutdownOutcome {
        info!(steps = self.steps.len(), "Starting graceful shutdown");
        let mut outcome = ShutdownOutcome::default();

        for (name, task) in self.steps {
            let started = Instant::now();
            let result = match tokio::time::timeout(self.step_timeout, task).await {
                Ok(Ok(())) => {
                    info!(
                        step = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Shutdown step completed"
                    );
                    Ok(())
                }
                Ok(Err(reason)) => Err(ShutdownError::Failed { step: name, reason }),
                Err(_elapsed) => Err(ShutdownError::TimedOut {
                    step: name,
                    timeout: self.step_timeout,
                }),
            };
            if let Err(e) = &result {
                error!(error = %e, "Shutdown step did not complete");
            }
            outcome.steps.push(StepOutcome { name, result });
        }

        if outcome.is_success() {
            info!("Graceful shutdown completed");
        } else {
            error!(
                failed = outcome.errors().count(),
                "Error during shutdown"
            );
        }
        outcome
    }
}

/// A task handle that aborts the task when dropped.
///
/// Used for shutdown steps that join a task: when the step times out its
/// future is dropped and the task goes with it.
#[derive(Debug)]
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }

    pub async fn join(mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A spawned task that runs until `true` is sent on its stop channel.
#[derive(Debug)]
pub struct StoppableTask<T> {
    stop_tx: watch::Sender<bool>,
    task: AbortOnDrop<T>,
}

impl<T: Send + 'static> StoppableTask<T> {
    /// Spawn `run` with the receiving end of a fresh stop channel.
    pub fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            task: AbortOnDrop::new(tokio::spawn(run(stop_rx))),
        }
    }

    /// Signal the task to stop and wait for it.
    pub async fn stop(self) -> Result<T, JoinError> {
        let _ = self.stop_tx.send(true);
        self.task.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::events::{BASELINE_COLLECTION, fixtures::commit};
    use crate::health::HealthTracker;
    use crate::metrics::RuleMetrics;
    use crate::processors::testing::{FakeSource, FakeTransport};
    use crate::processors::{BrokerPublisher, CommitForwarder, StreamConsumer};
    use crate::rules::{PatternRule, RuleSet, Topic};
    use crate::utils::retry::RetryPolicy;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;

    const STEP_TIMEOUT: Duration = Duration::from_secs(5);

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> StepFuture) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_steps = log.clone();
        let make = move |name: &'static str| -> StepFuture {
            let log = log_for_steps.clone();
            Box::pin(async move {
                log.lock().unwrap().push(name);
                Ok(())
            })
        };
        (log, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_run_in_order() {
        let (log, make) = recorder();
        let outcome = ShutdownOrchestrator::new(STEP_TIMEOUT)
            .step("http", make("http"))
            .step("consumer", make("consumer"))
            .step("kafka", make("kafka"))
            .run()
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(*log.lock().unwrap(), ["http", "consumer", "kafka"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_step_times_out_and_later_steps_run() {
        let (log, make) = recorder();
        let started = Instant::now();
        let outcome = ShutdownOrchestrator::new(STEP_TIMEOUT)
            .step("stuck", std::future::pending::<Result<(), String>>())
            .step("kafka", make("kafka"))
            .run()
            .await;

        assert!(started.elapsed() >= STEP_TIMEOUT);
        assert!(started.elapsed() < STEP_TIMEOUT + Duration::from_secs(1));
        assert_eq!(*log.lock().unwrap(), ["kafka"]);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(
            outcome.steps[0].result,
            Err(ShutdownError::TimedOut {
                step: "stuck",
                timeout: STEP_TIMEOUT
            })
        );
        assert!(outcome.steps[1].result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_is_recorded() {
        let (log, make) = recorder();
        let outcome = ShutdownOrchestrator::new(STEP_TIMEOUT)
            .step("consumer", async { Err::<(), _>("source already closed") })
            .step("kafka", make("kafka"))
            .run()
            .await;

        assert!(!outcome.is_success());
        assert_eq!(
            outcome.errors().collect::<Vec<_>>(),
            [&ShutdownError::Failed {
                step: "consumer",
                reason: "source already closed".to_string()
            }]
        );
        assert_eq!(*log.lock().unwrap(), ["kafka"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_with_publish_in_flight_is_bounded() {
        let rules = Arc::new(RuleSet::new(vec![
            PatternRule::new("text", "cat", Topic::new("cats").unwrap())
                .unwrap()
                .into(),
        ]));
        let health = HealthTracker::new(HealthConfig::default());
        let publisher = BrokerPublisher::new(
            FakeTransport::new(),
            health.clone(),
            RetryPolicy::default(),
        );
        publisher.connect().await.unwrap();
        publisher.transport().hang_sends.store(true, Ordering::SeqCst);

        let metrics = RuleMetrics::new(&rules);
        let forwarder = CommitForwarder::new(rules.clone(), metrics.clone(), health, publisher.clone());
        let source = FakeSource::new(vec![Ok(commit(
            BASELINE_COLLECTION,
            json!({ "text": "cat" }),
        ))])
        .staying_open();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = AbortOnDrop::new(tokio::spawn(
            StreamConsumer::new(source, forwarder).run(shutdown_rx),
        ));
        // Wait until the consumer has matched the event and is blocked in
        // the publish.
        let cats = Topic::new("cats").unwrap();
        while metrics.get(&cats) == Some(0) {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        let closer = publisher.clone();
        let outcome = ShutdownOrchestrator::new(STEP_TIMEOUT)
            .step("jetstream consumer", async move {
                let _ = shutdown_tx.send(true);
                consumer.join().await
            })
            .step("kafka producer", async move { closer.close().await })
            .run()
            .await;

        assert!(started.elapsed() >= STEP_TIMEOUT);
        assert!(started.elapsed() < STEP_TIMEOUT + Duration::from_secs(1));
        assert_eq!(outcome.exit_code(), 1);
        assert!(matches!(
            outcome.steps[0].result,
            Err(ShutdownError::TimedOut { .. })
        ));
        assert!(outcome.steps[1].result.is_ok());
        assert!(publisher.transport().closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stoppable_task_returns_after_stop() {
        let task = StoppableTask::spawn(|mut stop_rx| async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
            "stopped"
        });
        tokio::task::yield_now().await;

        assert_eq!(task.stop().await.unwrap(), "stopped");
    }
}
