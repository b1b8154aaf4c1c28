//! Per-issue serialization and the bounded event queue behind webhook intake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use rook_github::RepoRef;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::agent::{IssueAgent, WorkflowOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Identity of one tracked issue.
pub struct IssueKey {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl IssueKey {
    pub fn new(repo: &RepoRef, number: u64) -> Self {
        Self {
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
            number,
        }
    }
}

#[derive(Clone, Default)]
/// One async mutex per issue, shared by the poller and webhook workers so at
/// most one workflow step runs for an issue at a time.
pub struct IssueLocks {
    inner: Arc<Mutex<HashMap<IssueKey, Arc<AsyncMutex<()>>>>>,
}

impl IssueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<IssueKey, Arc<AsyncMutex<()>>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, key: &IssueKey) -> Arc<AsyncMutex<()>> {
        self.slots().entry(key.clone()).or_default().clone()
    }

    /// Waits until the issue is free.
    pub async fn acquire(&self, key: IssueKey) -> IssueGuard {
        let guard = self.slot(&key).lock_owned().await;
        IssueGuard {
            locks: self.clone(),
            key,
            guard: Some(guard),
        }
    }

    /// Returns `None` when another step already holds the issue.
    pub fn try_acquire(&self, key: IssueKey) -> Option<IssueGuard> {
        let slot = self.slot(&key);
        match slot.try_lock_owned() {
            Ok(guard) => Some(IssueGuard {
                locks: self.clone(),
                key,
                guard: Some(guard),
            }),
            Err(_) => {
                self.release(&key);
                None
            }
        }
    }

    /// Drops the slot once nothing but the registry references it.
    fn release(&self, key: &IssueKey) {
        let mut slots = self.slots();
        let unused = slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if unused {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots().len()
    }
}

/// Holds one issue's lock; the registry entry is pruned on drop when idle.
pub struct IssueGuard {
    locks: IssueLocks,
    key: IssueKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IssueGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Tracker event that can drive a workflow step.
pub enum WorkflowEvent {
    IssueAssigned {
        repo: RepoRef,
        issue_number: u64,
    },
    IssueComment {
        repo: RepoRef,
        issue_number: u64,
        body: String,
    },
    ReviewComment {
        repo: RepoRef,
        pull_number: u64,
        body: String,
    },
}

impl WorkflowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IssueAssigned { .. } => "issue_assigned",
            Self::IssueComment { .. } => "issue_comment",
            Self::ReviewComment { .. } => "review_comment",
        }
    }

    pub fn repo(&self) -> &RepoRef {
        match self {
            Self::IssueAssigned { repo, .. }
            | Self::IssueComment { repo, .. }
            | Self::ReviewComment { repo, .. } => repo,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `DispatchError` values.
pub enum DispatchError {
    #[error("workflow queue is full")]
    QueueFull,
    #[error("workflow queue is closed")]
    Closed,
}

/// Fixed pool of workers draining a bounded event queue.
pub struct WorkflowDispatcher {
    sender: mpsc::Sender<WorkflowEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkflowDispatcher {
    pub fn spawn(
        agent: Arc<IssueAgent>,
        locks: IssueLocks,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<WorkflowEvent>(queue_capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let agent = Arc::clone(&agent);
                let locks = locks.clone();
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else {
                            tracing::debug!(worker_id, "workflow queue closed; worker exiting");
                            return;
                        };
                        let kind = event.kind();
                        match run_event(&agent, &locks, event).await {
                            Ok(outcome) => tracing::info!(
                                worker_id,
                                event = kind,
                                outcome = outcome.label(),
                                "workflow event processed"
                            ),
                            Err(error) => tracing::warn!(
                                worker_id,
                                event = kind,
                                error = %format!("{error:#}"),
                                "workflow event failed"
                            ),
                        }
                    }
                })
            })
            .collect();
        Self { sender, workers }
    }

    /// Enqueues without waiting. A full queue is reported, not buffered.
    pub fn submit(&self, event: WorkflowEvent) -> Result<(), DispatchError> {
        self.sender.try_send(event).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Stops intake and waits for in-flight events to drain.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(error) = worker.await {
                tracing::warn!(error = %error, "workflow worker panicked");
            }
        }
    }
}

/// Runs one event under its issue lock.
pub async fn run_event(
    agent: &IssueAgent,
    locks: &IssueLocks,
    event: WorkflowEvent,
) -> Result<WorkflowOutcome> {
    match event {
        WorkflowEvent::IssueAssigned { repo, issue_number } => {
            let _guard = locks.acquire(IssueKey::new(&repo, issue_number)).await;
            agent.handle_issue_assignment(&repo, issue_number).await
        }
        WorkflowEvent::IssueComment {
            repo,
            issue_number,
            body,
        } => {
            let _guard = locks.acquire(IssueKey::new(&repo, issue_number)).await;
            agent.handle_issue_comment(&repo, issue_number, &body).await
        }
        WorkflowEvent::ReviewComment {
            repo,
            pull_number,
            body,
        } => {
            let issue_number = agent.linked_issue_number(&repo, pull_number).await?;
            let _guard = locks.acquire(IssueKey::new(&repo, issue_number)).await;
            agent
                .handle_review_comment(&repo, pull_number, issue_number, &body)
                .await
        }
    }
}
