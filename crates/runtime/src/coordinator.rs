#![forbid(unsafe_code)]

//! Background queries tagged with a per-channel generation. A result is shown only if its
//! generation is still the channel's newest when it arrives; superseded tasks run to
//! completion and their rows are dropped without any visible effect.

use crate::error::TaskError;
use crate::presenter::Presenter;
use crate::runner::TaskRunner;
use cv_core::filter::FilterSpec;
use cv_core::ids::{Channel, ProjectId};
use cv_storage::{
    ClusterMergeRequest, ClusterMergeResult, ClusterRow, ClusterUndoResult, MemberRow,
    ParentAssociationRow, ParentRow, SqliteStore, StoreError,
};
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Parents,
    Members,
    Clusters,
    Associations,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub project: ProjectId,
    pub kind: QueryKind,
    pub filter: FilterSpec,
}

impl QueryRequest {
    pub fn new(project: ProjectId, kind: QueryKind, filter: FilterSpec) -> Self {
        Self {
            project,
            kind,
            filter,
        }
    }

    fn run(&self, store: &mut SqliteStore) -> Result<QueryRows, StoreError> {
        let project = &self.project;
        let filter = &self.filter;
        Ok(match self.kind {
            QueryKind::Parents => QueryRows::Parents(store.parents_query(project, filter)?),
            QueryKind::Members => QueryRows::Members(store.members_query(project, filter)?),
            QueryKind::Clusters => QueryRows::Clusters(store.clusters_query(project, filter)?),
            QueryKind::Associations => {
                QueryRows::Associations(store.parent_associations_query(project, filter)?)
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryRows {
    Parents(Vec<ParentRow>),
    Members(Vec<MemberRow>),
    Clusters(Vec<ClusterRow>),
    Associations(Vec<ParentAssociationRow>),
}

impl QueryRows {
    pub fn len(&self) -> usize {
        match self {
            Self::Parents(rows) => rows.len(),
            Self::Members(rows) => rows.len(),
            Self::Clusters(rows) => rows.len(),
            Self::Associations(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryTicket {
    pub channel: Channel,
    pub generation: u64,
}

/// What a finished query task reports back.
#[derive(Debug)]
pub struct QueryCompletion {
    pub channel: Channel,
    pub generation: u64,
    pub result: Result<QueryRows, TaskError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryOutcome {
    Applied {
        channel: Channel,
        generation: u64,
    },
    StaleDiscarded {
        channel: Channel,
        generation: u64,
        current: u64,
    },
    Failed {
        channel: Channel,
        generation: u64,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    MergeApplied { snapshot_id: i64 },
    UndoApplied { snapshot_id: i64 },
    Failed { code: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Processed {
    Query(QueryOutcome),
    Command(CommandOutcome),
}

enum Completion {
    Query(QueryCompletion),
    Merge(Result<ClusterMergeResult, TaskError>),
    Undo(Result<ClusterUndoResult, TaskError>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub generation: u64,
    pub loading: bool,
}

/// Single consumer of the completion queue. Only `&mut self` methods touch channel state, so
/// the coordinator is driven from one task and never locks.
pub struct QueryCoordinator<P> {
    runner: TaskRunner,
    presenter: P,
    channels: HashMap<Channel, ChannelState>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
}

impl<P: Presenter> QueryCoordinator<P> {
    pub fn new(runner: TaskRunner, presenter: P) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            runner,
            presenter,
            channels: HashMap::new(),
            completions_tx,
            completions_rx,
            in_flight: 0,
        }
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn channel_state(&self, channel: &Channel) -> ChannelState {
        self.channels.get(channel).copied().unwrap_or_default()
    }

    /// Tasks issued whose completion has not been processed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Supersedes every earlier query on `channel` and submits the new one. Never blocks.
    pub fn issue_query(&mut self, channel: Channel, request: QueryRequest) -> QueryTicket {
        let state = self.channels.entry(channel.clone()).or_default();
        state.generation += 1;
        let generation = state.generation;
        if !state.loading {
            state.loading = true;
            self.presenter.loading_changed(&channel, true);
        }
        tracing::debug!(
            channel = channel.as_str(),
            generation,
            kind = ?request.kind,
            "query issued"
        );

        let task = self
            .runner
            .submit("query", move |store| request.run(store));
        let tx = self.completions_tx.clone();
        let ticket = QueryTicket {
            channel: channel.clone(),
            generation,
        };
        self.in_flight += 1;
        self.runner.handle().spawn(async move {
            let result = task.join().await;
            let _ = tx.send(Completion::Query(QueryCompletion {
                channel,
                generation,
                result,
            }));
        });
        ticket
    }

    /// Merges on a runner task; the summary reaches the presenter through the completion queue.
    pub fn merge(&mut self, project: ProjectId, request: ClusterMergeRequest) {
        let task = self.runner.submit("cluster_merge", move |store| {
            store.cluster_merge(&project, request)
        });
        let tx = self.completions_tx.clone();
        self.in_flight += 1;
        self.runner.handle().spawn(async move {
            let _ = tx.send(Completion::Merge(task.join().await));
        });
    }

    /// Undoes `snapshot_id`, or the newest unconsumed merge when `None`.
    pub fn undo(&mut self, project: ProjectId, snapshot_id: Option<i64>) {
        let task = self
            .runner
            .submit("cluster_merge_undo", move |store| match snapshot_id {
                Some(snapshot_id) => store.cluster_merge_undo(&project, snapshot_id),
                None => store.cluster_merge_undo_latest(&project),
            });
        let tx = self.completions_tx.clone();
        self.in_flight += 1;
        self.runner.handle().spawn(async move {
            let _ = tx.send(Completion::Undo(task.join().await));
        });
    }

    /// Waits for and handles one completion. `None` once nothing is outstanding.
    pub async fn process_next(&mut self) -> Option<Processed> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.completions_rx.recv().await?;
        self.in_flight -= 1;
        Some(match completion {
            Completion::Query(completion) => Processed::Query(self.handle_completion(completion)),
            Completion::Merge(result) => Processed::Command(self.handle_merge(result)),
            Completion::Undo(result) => Processed::Command(self.handle_undo(result)),
        })
    }

    /// Handles completions until every issued task has reported back.
    pub async fn settle(&mut self) -> Vec<Processed> {
        let mut processed = Vec::new();
        while let Some(outcome) = self.process_next().await {
            processed.push(outcome);
        }
        processed
    }

    /// Applies, discards, or surfaces one query result against the channel's state as it is
    /// now, not as it was when the query was issued.
    pub fn handle_completion(&mut self, completion: QueryCompletion) -> QueryOutcome {
        let QueryCompletion {
            channel,
            generation,
            result,
        } = completion;
        // Generations start at 1; a channel that never issued a query has nothing current.
        let current = self.channels.get(&channel).map_or(0, |state| state.generation);
        let state = match self.channels.get_mut(&channel) {
            Some(state) if generation != 0 && generation == current => state,
            _ => {
                tracing::debug!(
                    channel = channel.as_str(),
                    generation,
                    current,
                    "stale query result discarded"
                );
                return QueryOutcome::StaleDiscarded {
                    channel,
                    generation,
                    current,
                };
            }
        };

        let was_loading = std::mem::replace(&mut state.loading, false);
        let outcome = match result {
            Ok(rows) => {
                tracing::debug!(
                    channel = channel.as_str(),
                    generation,
                    rows = rows.len(),
                    "query applied"
                );
                self.presenter.applied(&channel, generation, rows);
                QueryOutcome::Applied {
                    channel: channel.clone(),
                    generation,
                }
            }
            Err(err) => {
                tracing::warn!(
                    channel = channel.as_str(),
                    generation,
                    code = err.code(),
                    error = %err,
                    "query failed"
                );
                self.presenter.failed(&channel, &err);
                QueryOutcome::Failed {
                    channel: channel.clone(),
                    generation,
                }
            }
        };
        if was_loading {
            self.presenter.loading_changed(&channel, false);
        }
        outcome
    }

    fn handle_merge(&mut self, result: Result<ClusterMergeResult, TaskError>) -> CommandOutcome {
        match result {
            Ok(summary) => {
                let snapshot_id = summary.snapshot_id;
                self.presenter.merge_applied(summary);
                CommandOutcome::MergeApplied { snapshot_id }
            }
            Err(err) => self.command_failed(&err),
        }
    }

    fn handle_undo(&mut self, result: Result<ClusterUndoResult, TaskError>) -> CommandOutcome {
        match result {
            Ok(summary) => {
                let snapshot_id = summary.snapshot_id;
                self.presenter.undo_applied(summary);
                CommandOutcome::UndoApplied { snapshot_id }
            }
            Err(err) => self.command_failed(&err),
        }
    }

    fn command_failed(&mut self, err: &TaskError) -> CommandOutcome {
        tracing::warn!(code = err.code(), error = %err, "command failed");
        self.presenter.command_failed(err);
        CommandOutcome::Failed { code: err.code() }
    }
}
