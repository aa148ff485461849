#![forbid(unsafe_code)]

use crate::coordinator::QueryRows;
use crate::error::TaskError;
use cv_core::ids::Channel;
use cv_storage::{ClusterMergeResult, ClusterUndoResult};
use tokio::sync::mpsc;

pub type MergeSummary = ClusterMergeResult;
pub type UndoSummary = ClusterUndoResult;

/// Receives everything the coordinator decides to show. Called from the coordinator's own
/// task only, so implementations need no locking.
pub trait Presenter {
    fn applied(&mut self, channel: &Channel, generation: u64, rows: QueryRows);
    fn failed(&mut self, channel: &Channel, error: &TaskError);
    fn loading_changed(&mut self, channel: &Channel, loading: bool);
    fn merge_applied(&mut self, summary: MergeSummary);
    fn undo_applied(&mut self, summary: UndoSummary);
    fn command_failed(&mut self, error: &TaskError);
}

#[derive(Clone, Debug)]
pub enum PresenterEvent {
    Applied {
        channel: Channel,
        generation: u64,
        rows: QueryRows,
    },
    Failed {
        channel: Channel,
        error: TaskError,
    },
    LoadingChanged {
        channel: Channel,
        loading: bool,
    },
    MergeApplied(MergeSummary),
    UndoApplied(UndoSummary),
    CommandFailed(TaskError),
}

/// Forwards every notification as a [`PresenterEvent`] to whoever owns the receiver.
#[derive(Clone, Debug)]
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<PresenterEvent>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PresenterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: PresenterEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("presenter receiver dropped");
        }
    }
}

impl Presenter for ChannelPresenter {
    fn applied(&mut self, channel: &Channel, generation: u64, rows: QueryRows) {
        self.emit(PresenterEvent::Applied {
            channel: channel.clone(),
            generation,
            rows,
        });
    }

    fn failed(&mut self, channel: &Channel, error: &TaskError) {
        self.emit(PresenterEvent::Failed {
            channel: channel.clone(),
            error: error.clone(),
        });
    }

    fn loading_changed(&mut self, channel: &Channel, loading: bool) {
        self.emit(PresenterEvent::LoadingChanged {
            channel: channel.clone(),
            loading,
        });
    }

    fn merge_applied(&mut self, summary: MergeSummary) {
        self.emit(PresenterEvent::MergeApplied(summary));
    }

    fn undo_applied(&mut self, summary: UndoSummary) {
        self.emit(PresenterEvent::UndoApplied(summary));
    }

    fn command_failed(&mut self, error: &TaskError) {
        self.emit(PresenterEvent::CommandFailed(error.clone()));
    }
}
