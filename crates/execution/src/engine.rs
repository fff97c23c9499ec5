//! The tick driver.
//!
//! One tick builds a graph view, evaluates every automated entity's condition
//! tree as a task on a [`JoinSet`], and gathers the decisions. Entities whose
//! trees read same-tick decisions wait for their ancestors to settle before
//! taking a concurrency permit, so waiting never holds a permit.

use crate::dependency::{DependencyResolver, Resolution};
use crate::result::{EntityError, TickResult};
use crate::{Clock, EngineConfig, RequestSink, SystemClock};
use anyhow::Context;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tickwise_condition::{evaluate_entity, EntityEvaluation, RequestedSubsets, RootContext, TickScope};
use tickwise_core::{AutomationCondition, EntityKey, TickCursor};
use tickwise_graph::{AssetGraph, AssetGraphView};
use tickwise_storage::{CursorStore, EventStore};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Evaluates ticks over one graph and event log.
pub struct TickEvaluator {
    graph: Arc<AssetGraph>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl TickEvaluator {
    /// Create an evaluator using the system clock and default config.
    pub fn new(graph: Arc<AssetGraph>, events: Arc<dyn EventStore>) -> Self {
        Self {
            graph,
            events,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Set the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The evaluated graph.
    pub fn graph(&self) -> &AssetGraph {
        &self.graph
    }

    /// Evaluate every automated entity. Persists nothing.
    pub async fn evaluate_tick(&self, previous: &TickCursor) -> anyhow::Result<TickResult> {
        self.evaluate_tick_until(previous, std::future::pending()).await
    }

    /// Like [`evaluate_tick`](Self::evaluate_tick), stopping early once
    /// `shutdown` completes. Unfinished entities are listed in
    /// [`TickResult::omitted`].
    pub async fn evaluate_tick_until<F>(&self, previous: &TickCursor, shutdown: F) -> anyhow::Result<TickResult>
    where
        F: Future<Output = ()>,
    {
        let keys = self.graph.automated_keys();
        self.evaluate_entities(&keys, previous, shutdown).await
    }

    /// Evaluate the given entities. Entities without a condition are skipped.
    pub async fn evaluate_entities<F>(
        &self,
        keys: &[EntityKey],
        previous: &TickCursor,
        shutdown: F,
    ) -> anyhow::Result<TickResult>
    where
        F: Future<Output = ()>,
    {
        let evaluation_time = self.clock.now();
        let evaluation_id = previous.evaluation_id + 1;

        let entities: Vec<(EntityKey, AutomationCondition)> = keys
            .iter()
            .filter_map(|key| match self.graph.condition_tree(key) {
                Ok(Some(condition)) => Some((key.clone(), condition.clone())),
                _ => {
                    debug!("Skipping {}: no automation condition", key);
                    None
                }
            })
            .collect();
        info!(
            "Starting tick {} at {} ({} entities)",
            evaluation_id,
            evaluation_time,
            entities.len()
        );

        let view = AssetGraphView::new(Arc::clone(&self.graph), Arc::clone(&self.events), evaluation_time)
            .await
            .context("failed to build graph view")?;
        let evaluated: Vec<EntityKey> = entities.iter().map(|(k, _)| k.clone()).collect();
        let requested = Arc::new(RequestedSubsets::new(&evaluated));
        let scope = Arc::new(TickScope::new(Arc::new(view), requested, Arc::new(previous.clone())));
        let resolver = DependencyResolver::new(&self.graph, &evaluated);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.get()));

        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();
        for (key, condition) in entities {
            let wait_for = match resolver.check(&key) {
                Resolution::Ready => Vec::new(),
                Resolution::WaitFor(keys) => keys,
            };
            pending.insert(key.clone());
            tasks.spawn(evaluate_one(EntityTask {
                key,
                condition,
                wait_for,
                scope: Arc::clone(&scope),
                semaphore: Arc::clone(&semaphore),
                timeout: self.config.entity_timeout,
            }));
        }

        let mut result = TickResult::new(evaluation_id, evaluation_time);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tasks.abort_all();
                    warn!("Tick {} cancelled with {} entities unfinished", evaluation_id, pending.len());
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((key, outcome))) => {
                        pending.remove(&key);
                        record(&mut result, key, outcome);
                    }
                    // Tasks are only aborted on shutdown; panics are caught inside.
                    Some(Err(e)) => error!("Evaluation task failed: {}", e),
                }
            }
        }
        result.omitted = pending.into_iter().collect();

        info!(
            "Finished tick {}: {} entities requested, {} errors, {} omitted",
            evaluation_id,
            result.non_empty_requests().len(),
            result.errors.len(),
            result.omitted.len()
        );
        Ok(result)
    }

    /// Load the cursor, evaluate, commit the next cursor, then hand the
    /// requests to `sink`.
    pub async fn run_tick<C>(&self, cursors: &mut C, sink: &dyn RequestSink) -> anyhow::Result<TickResult>
    where
        C: CursorStore + ?Sized,
    {
        self.run_tick_until(cursors, sink, std::future::pending()).await
    }

    /// [`run_tick`](Self::run_tick) with cancellation.
    pub async fn run_tick_until<C, F>(
        &self,
        cursors: &mut C,
        sink: &dyn RequestSink,
        shutdown: F,
    ) -> anyhow::Result<TickResult>
    where
        C: CursorStore + ?Sized,
        F: Future<Output = ()>,
    {
        let previous = cursors
            .load()
            .await
            .context("failed to load cursor")?
            .unwrap_or_default();
        let result = self.evaluate_tick_until(&previous, shutdown).await?;

        let next = result.next_cursor(&previous, &self.graph);
        if let Err(e) = cursors.commit(&next).await {
            error!("Failed to commit cursor for tick {}: {}", next.evaluation_id, e);
            return Err(e).context("failed to commit cursor");
        }

        let requests = result.non_empty_requests();
        if !requests.is_empty() {
            sink.submit(next.evaluation_id, &requests).await?;
        }
        Ok(result)
    }

    /// Run ticks until `max_ticks` is reached or `shutdown` flips to true.
    /// A failed tick is logged and the loop continues. Returns the number of
    /// ticks attempted.
    pub async fn run<C>(
        &self,
        cursors: &mut C,
        sink: &dyn RequestSink,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<usize>
    where
        C: CursorStore + ?Sized,
    {
        let mut ticks = 0;
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }

            match self
                .run_tick_until(cursors, sink, shutdown_signal(shutdown.clone()))
                .await
            {
                Ok(result) if !result.omitted.is_empty() => {
                    ticks += 1;
                    break;
                }
                Ok(_) => ticks += 1,
                Err(e) => {
                    ticks += 1;
                    error!("Tick failed: {:#}", e);
                }
            }

            if let Some(max) = self.config.max_ticks {
                if ticks >= max {
                    info!("Reached max ticks ({})", max);
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = shutdown_signal(shutdown.clone()) => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }
        Ok(ticks)
    }
}

/// Completes once `true` is sent. Never completes if the sender is gone.
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn record(result: &mut TickResult, key: EntityKey, outcome: Result<EntityEvaluation, EntityError>) {
    match outcome {
        Ok(EntityEvaluation { result: tree, cursor }) => {
            debug!("Evaluated {}: {} true", key, tree.true_subset.size());
            result.requested.insert(key.clone(), tree.true_subset.clone());
            result.cursors.insert(key.clone(), cursor);
            result.results.insert(key, tree);
        }
        Err(e) => {
            warn!("Evaluation of {} failed: {}", key, e);
            result.errors.insert(key, e);
        }
    }
}

struct EntityTask {
    key: EntityKey,
    condition: AutomationCondition,
    wait_for: Vec<EntityKey>,
    scope: Arc<TickScope>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

/// Releases waiters on an entity however its evaluation ends.
struct SettleOnDrop {
    requested: Arc<RequestedSubsets>,
    key: EntityKey,
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        self.requested.settle(&self.key);
    }
}

async fn evaluate_one(task: EntityTask) -> (EntityKey, Result<EntityEvaluation, EntityError>) {
    let key = task.key.clone();
    let outcome = AssertUnwindSafe(run_entity(task))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(EntityError::Panicked(panic_message(panic.as_ref()))));
    (key, outcome)
}

async fn run_entity(task: EntityTask) -> Result<EntityEvaluation, EntityError> {
    let EntityTask {
        key,
        condition,
        wait_for,
        scope,
        semaphore,
        timeout,
    } = task;
    let _settle = SettleOnDrop {
        requested: Arc::clone(&scope.requested),
        key: key.clone(),
    };

    for ancestor in &wait_for {
        scope.requested.wait_for(ancestor).await;
    }
    // The semaphore is never closed.
    let _permit = semaphore.acquire_owned().await.ok();

    let root = RootContext::new(key, condition, scope);
    let evaluation = tokio::time::timeout(timeout, evaluate_entity(&root))
        .await
        .map_err(|_| EntityError::Timeout(timeout))??;
    root.scope().requested.publish(evaluation.requested().clone());
    Ok(evaluation)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
