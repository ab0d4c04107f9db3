//! Core data model: graph objects, steps, and synchronization jobs.

pub mod entity;
pub mod step;
pub mod synchronization;

pub use entity::{Entity, GraphProperties, RawDataEntry, Relationship};
pub use step::{
    DeclaredType, IntegrationStep, StepResult, StepResultStatus, StepStartState, StepStartStates,
};
pub use synchronization::{PartialDatasets, SynchronizationJob, SynchronizationJobStatus};
