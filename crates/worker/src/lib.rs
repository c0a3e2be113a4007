pub mod components;
pub mod job_loop;
pub mod runner;

pub use components::{
    DependencyInstaller, EvaluationEngine, HarnessLoader, LeaseKeeper, LoadedHarness,
    LoadedSubmission, Predictor, PredictorInvocation, PredictorRegistry, ProcessPredictor,
    ReportBuilder, SubmissionLoader,
};
pub use job_loop::{IterationOutcome, JobLoop, JobLoopSettings};
pub use runner::{HarnessRunner, JobContext, StandardRunner};
