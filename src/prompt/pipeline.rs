use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::error::PipelineError;
use super::generation::TextGenerator;
use super::history::{Message, MessageHistory, MessageStatus};
use super::store::{ItemRecord, ItemStore};
use crate::graph_utils::ids::{CorrelationId, IdAllocator};

/// Lifecycle of one submission once it has an id. Text still being composed
/// lives in [`PromptSession::input`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Submitted,
    AwaitingGeneration,
    AwaitingPersistence,
    Resolved,
    Failed,
}

/// What happens to a user entry whose submission fails.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Log and leave the entry as it is.
    #[default]
    Silent,
    /// Log and flag the user entry as failed.
    MarkFailed,
}

#[derive(Debug)]
pub enum PipelineEvent {
    Progress { id: CorrelationId, state: SubmissionState },
    Resolved { id: CorrelationId, text: String },
    Failed { id: CorrelationId, error: PipelineError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Resolved(CorrelationId),
    Failed(CorrelationId),
    /// Finished after its user entry was replaced by a loaded history.
    Discarded(CorrelationId),
}

/// Runs submissions as tasks on a tokio runtime and folds their results back
/// into a [`MessageHistory`] on the caller's thread.
///
/// Tasks never touch the history themselves. They report through a channel
/// and the owner applies events via [`PromptPipeline::poll`] (non-blocking,
/// once per frame) or [`PromptPipeline::next_outcome`] (async).
pub struct PromptPipeline {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ItemStore>,
    runtime: Handle,
    policy: FailurePolicy,
    tx: UnboundedSender<PipelineEvent>,
    rx: UnboundedReceiver<PipelineEvent>,
    states: HashMap<CorrelationId, SubmissionState>,
    in_flight: usize,
}

impl PromptPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn ItemStore>,
        policy: FailurePolicy,
        runtime: Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { generator, store, runtime, policy, tx, rx, states: HashMap::new(), in_flight: 0 }
    }

    pub fn policy(&self) -> FailurePolicy { self.policy }
    pub fn set_policy(&mut self, policy: FailurePolicy) { self.policy = policy; }

    pub fn in_flight(&self) -> usize { self.in_flight }

    pub fn state_of(&self, id: &CorrelationId) -> Option<SubmissionState> {
        self.states.get(id).copied()
    }

    /// Mint a correlation id, append the user entry right away, then hand the
    /// text to a background task. Empty text is sent like any other.
    pub fn submit(&mut self, ids: &mut IdAllocator, history: &mut MessageHistory, text: String) -> CorrelationId {
        let id = ids.next_correlation_id();
        history.append(Message::user(id.clone(), text.clone()));
        self.states.insert(id.clone(), SubmissionState::Submitted);
        self.in_flight += 1;
        log::debug!("submission {} queued ({} in flight)", id, self.in_flight);

        let task = run_submission(
            id.clone(),
            text,
            Arc::clone(&self.generator),
            Arc::clone(&self.store),
            self.tx.clone(),
        );
        let handle = self.runtime.spawn(task);
        // A task that panics or is cancelled never reports; settle it here.
        let tx = self.tx.clone();
        let watched = id.clone();
        self.runtime.spawn(async move {
            if let Err(e) = handle.await {
                let reason = if e.is_panic() { "panicked" } else { "cancelled" };
                let _ = tx.send(PipelineEvent::Failed { id: watched, error: PipelineError::Aborted(reason.to_string()) });
            }
        });
        id
    }

    /// Apply every event that has already arrived. Returns how many
    /// submissions reached a terminal state.
    pub fn poll(&mut self, history: &mut MessageHistory) -> usize {
        let mut finished = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.apply(event, history).is_some() {
                finished += 1;
            }
        }
        finished
    }

    /// Wait for the next submission to finish and apply it. `None` when
    /// nothing is in flight.
    pub async fn next_outcome(&mut self, history: &mut MessageHistory) -> Option<SubmissionOutcome> {
        while self.in_flight > 0 {
            let event = self.rx.recv().await?;
            if let Some(outcome) = self.apply(event, history) {
                return Some(outcome);
            }
        }
        None
    }

    /// Wait until every submission has finished.
    pub async fn settle(&mut self, history: &mut MessageHistory) -> Vec<SubmissionOutcome> {
        let mut out = Vec::new();
        while let Some(o) = self.next_outcome(history).await {
            out.push(o);
        }
        out
    }

    fn apply(&mut self, event: PipelineEvent, history: &mut MessageHistory) -> Option<SubmissionOutcome> {
        match event {
            PipelineEvent::Progress { id, state } => {
                log::debug!("submission {} -> {:?}", id, state);
                self.states.insert(id, state);
                None
            }
            PipelineEvent::Resolved { id, .. } | PipelineEvent::Failed { id, .. } if history.user_entry(&id).is_none() => {
                log::warn!("submission {} finished after its transcript was replaced; dropping result", id);
                self.finish(&id, SubmissionState::Failed);
                Some(SubmissionOutcome::Discarded(id))
            }
            PipelineEvent::Resolved { id, text } => {
                history.append(Message::response(id.clone(), text));
                history.set_status(&id, MessageStatus::Delivered);
                self.finish(&id, SubmissionState::Resolved);
                log::info!("submission {} resolved", id);
                Some(SubmissionOutcome::Resolved(id))
            }
            PipelineEvent::Failed { id, error } => {
                log::error!("submission {} failed at {}: {}", id, error.stage(), error);
                if self.policy == FailurePolicy::MarkFailed {
                    history.set_status(&id, MessageStatus::Failed);
                }
                self.finish(&id, SubmissionState::Failed);
                Some(SubmissionOutcome::Failed(id))
            }
        }
    }

    fn finish(&mut self, id: &CorrelationId, state: SubmissionState) {
        self.states.insert(id.clone(), state);
        self.in_flight = self.in_flight.saturating_sub(1);
    }
}

async fn run_submission(
    id: CorrelationId,
    prompt: String,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ItemStore>,
    tx: UnboundedSender<PipelineEvent>,
) {
    // Send errors mean the pipeline was dropped; nobody is left to tell.
    let _ = tx.send(PipelineEvent::Progress { id: id.clone(), state: SubmissionState::AwaitingGeneration });
    let generated = match generator.generate(&prompt).await {
        Ok(text) => text,
        Err(error) => {
            let _ = tx.send(PipelineEvent::Failed { id, error });
            return;
        }
    };

    let _ = tx.send(PipelineEvent::Progress { id: id.clone(), state: SubmissionState::AwaitingPersistence });
    let record = ItemRecord { id: id.to_string(), request: prompt, response: generated };
    let event = match store.save(&record).await {
        Ok(stored) => PipelineEvent::Resolved { id, text: stored.response },
        Err(error) => PipelineEvent::Failed { id, error },
    };
    let _ = tx.send(event);
}

/// Input field plus transcript, the state behind the prompt panel.
pub struct PromptSession {
    pub input: String,
    pub history: MessageHistory,
    pipeline: PromptPipeline,
}

impl PromptSession {
    pub fn new(pipeline: PromptPipeline) -> Self {
        Self::with_history(MessageHistory::new(), pipeline)
    }

    pub fn with_history(history: MessageHistory, pipeline: PromptPipeline) -> Self {
        Self { input: String::new(), history, pipeline }
    }

    /// Submit whatever is in the input field and clear it immediately.
    pub fn submit(&mut self, ids: &mut IdAllocator) -> CorrelationId {
        let text = std::mem::take(&mut self.input);
        self.pipeline.submit(ids, &mut self.history, text)
    }

    pub fn poll(&mut self) -> usize { self.pipeline.poll(&mut self.history) }

    pub async fn next_outcome(&mut self) -> Option<SubmissionOutcome> {
        self.pipeline.next_outcome(&mut self.history).await
    }

    pub async fn settle(&mut self) -> Vec<SubmissionOutcome> {
        self.pipeline.settle(&mut self.history).await
    }

    pub fn state_of(&self, id: &CorrelationId) -> Option<SubmissionState> {
        self.pipeline.state_of(id)
    }

    pub fn in_flight(&self) -> usize { self.pipeline.in_flight() }

    pub fn policy(&self) -> FailurePolicy { self.pipeline.policy() }

    pub fn set_policy(&mut self, policy: FailurePolicy) { self.pipeline.set_policy(policy); }

    /// Swap in a transcript loaded from disk. Submissions still in flight keep
    /// running; their results are only applied if the loaded transcript holds
    /// their user entry.
    pub fn replace_history(&mut self, history: MessageHistory) {
        self.history = history;
    }
}
