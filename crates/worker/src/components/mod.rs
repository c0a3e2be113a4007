pub mod dependency_installer;
pub mod evaluation_engine;
pub mod harness_loader;
pub mod lease_keeper;
pub mod plots;
pub mod predictors;
pub mod report_builder;
pub mod scoring;
pub mod submission_loader;

pub use dependency_installer::DependencyInstaller;
pub use evaluation_engine::EvaluationEngine;
pub use harness_loader::{HarnessLoader, LoadedHarness};
pub use lease_keeper::LeaseKeeper;
pub use predictors::{Predictor, PredictorInvocation, PredictorRegistry, ProcessPredictor};
pub use report_builder::ReportBuilder;
pub use submission_loader::{LoadedSubmission, SubmissionLoader};
