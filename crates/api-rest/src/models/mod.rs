//! Request and response models

pub mod common;
pub mod experiments;

pub use common::{HealthResponse, ListExperimentsQuery, PaginatedResponse, ResultsQuery};
pub use experiments::{
    AssignRequest, AssignResponse, CreateExperimentRequest, EventAck, RecordEventRequest,
    VariantInput,
};
