//! Lo-fi video pipeline: stage adapters, the per-run state machine, the
//! orchestrator with its batch loop, and the metadata record store.

pub mod adapters;
pub mod orchestrator;
pub mod run;
pub mod stages;
pub mod store;

pub use orchestrator::{BatchOptions, BatchSummary, Pipeline, PipelineSettings, PromptSource, RunReport};
pub use run::{Run, RunState, StageOutput, StageResult, StageStatus};
pub use stages::Stages;
pub use store::{MetadataStore, StoreError};
