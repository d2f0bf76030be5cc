//! OData operations module
//!
//! Operations can be executed individually or bundled into a `$batch`
//! request, optionally grouped into atomic changesets.

pub mod batch;
pub mod operation;
pub mod response;

pub use batch::{Batch, BatchItem, BatchRequest, Changeset};
pub use operation::{EtagConflict, Operation, OperationKind, OperationResult, ResultType};
pub use response::{BatchResponse, BatchResponseParser};
