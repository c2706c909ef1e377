//! Action execution: authorization, submission, retries and reconciliation.

pub mod executor;
pub mod in_flight;
pub mod layer;
pub mod paper;

pub use executor::{
    action_hash, result_delta, ActionExecutor, Disposition, ExecutionReport, ExecutorSettings,
};
pub use in_flight::{InFlightClaim, InFlightSlots};
pub use layer::{ExecutionLayer, ExecutionReceipt, SubmissionId, SubmissionRequest, SubmissionStatus};
pub use paper::PaperExecutionLayer;
