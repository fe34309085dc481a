//! Job orchestration: the state machine that turns a generation request
//! into a color image on disk plus a derived normal map.
pub mod job;
pub mod orchestrator;

pub use job::{JobSnapshot, JobState};
pub use orchestrator::{
    CompletedJob, GenerateOutcome, GeneratedMaterial, MaterialSettings, MaterialSink, NoopSink,
    Orchestrator, OrchestratorOptions, MATERIALS_DIR,
};
