#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod debouncer;
pub mod error;
pub mod presenter;
pub mod runner;
mod session;
pub mod telemetry;

pub use config::RuntimeConfig;
pub use coordinator::{
    ChannelState, CommandOutcome, Processed, QueryCompletion, QueryCoordinator, QueryKind,
    QueryOutcome, QueryRequest, QueryRows, QueryTicket,
};
pub use debouncer::{Debouncer, OperationGuard, OperationSet};
pub use error::{ConfigError, SessionError, TaskError};
pub use presenter::{ChannelPresenter, MergeSummary, Presenter, PresenterEvent, UndoSummary};
pub use runner::{TaskHandle, TaskRunner};
pub use session::Session;
