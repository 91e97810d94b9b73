mod pipeline;
mod serial;
mod store;

pub use pipeline::{
    Action, Event, InsufficientOperationalNodesError, Pipeline, PipelineData, PipelineError,
    RequestCompletedCallback,
};
pub use serial::{PerformSerialRequests, StoreRequest};
pub use store::{Store, StoreError, StoreValue};
