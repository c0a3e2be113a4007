pub mod analysis;
pub mod entities;
pub mod ports;
pub mod time_series;

pub use analysis::*;
pub use entities::*;
pub use evaluator_errors::{EvaluatorError, EvaluatorResult};
pub use ports::*;
pub use time_series::TimeSeries;
