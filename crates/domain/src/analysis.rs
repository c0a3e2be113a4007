use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    Scalar,
    TimeSeries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    Runtime,
    AbsoluteError,
    MeanAbsoluteError,
    Error,
    RootMeanSquaredError,
}

impl PerformanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceMetric::Runtime => "runtime",
            PerformanceMetric::AbsoluteError => "absolute_error",
            PerformanceMetric::MeanAbsoluteError => "mean_absolute_error",
            PerformanceMetric::Error => "error",
            PerformanceMetric::RootMeanSquaredError => "root_mean_squared_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotType {
    Histogram,
    ScatterPlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    #[serde(rename = "type")]
    pub plot_type: PlotType,
    pub x_val: String,
    #[serde(default)]
    pub y_val: Option<String>,
    #[serde(default)]
    pub color_code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub save_file_path: String,
}

/// harness 的 `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefinition {
    #[serde(skip)]
    pub analysis_id: i64,
    pub function_name: String,
    pub comparison_type: ComparisonType,
    pub ground_truth_compare: Vec<String>,
    #[serde(default)]
    pub allowable_kwargs: Vec<String>,
    #[serde(default)]
    pub performance_metrics: Vec<PerformanceMetric>,
    #[serde(default)]
    pub plots: Vec<PlotSpec>,
    pub public_results_table: String,
    #[serde(default)]
    pub private_results_columns: Vec<String>,
}

impl AnalysisDefinition {
    pub fn from_json(analysis_id: i64, bytes: &[u8]) -> EvaluatorResult<Self> {
        let mut definition: AnalysisDefinition = serde_json::from_slice(bytes)
            .map_err(|e| EvaluatorError::InvalidAnalysisConfig(e.to_string()))?;
        definition.analysis_id = analysis_id;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> EvaluatorResult<()> {
        let invalid = |msg: String| Err(EvaluatorError::InvalidAnalysisConfig(msg));

        if self.function_name.trim().is_empty() {
            return invalid("function_name cannot be empty".to_string());
        }
        if self.ground_truth_compare.is_empty() {
            return invalid("ground_truth_compare cannot be empty".to_string());
        }
        if self.comparison_type == ComparisonType::TimeSeries
            && self.ground_truth_compare.len() != 1
        {
            return invalid(format!(
                "time_series comparison expects exactly one ground truth field, got {}",
                self.ground_truth_compare.len()
            ));
        }
        let table = self.public_results_table.trim();
        if table.is_empty() || table.contains('/') {
            return invalid(format!(
                "public_results_table must be a plain file name: {:?}",
                self.public_results_table
            ));
        }
        for plot in &self.plots {
            if plot.plot_type == PlotType::ScatterPlot && plot.y_val.is_none() {
                return invalid(format!("scatter_plot {:?} requires y_val", plot.x_val));
            }
            if plot.save_file_path.trim().is_empty() || plot.save_file_path.contains('/') {
                return invalid(format!(
                    "plot save_file_path must be a plain file name: {:?}",
                    plot.save_file_path
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "function_name": "estimate_az_tilt",
        "comparison_type": "scalar",
        "ground_truth_compare": ["tilt", "azimuth"],
        "allowable_kwargs": ["latitude", "longitude"],
        "performance_metrics": ["runtime", "absolute_error"],
        "plots": [
            {"type": "histogram", "x_val": "absolute_error_tilt", "color_code": "issue", "save_file_path": "tilt_hist.svg"},
            {"type": "scatter_plot", "x_val": "tilt", "y_val": "absolute_error_tilt", "save_file_path": "tilt_scatter.svg"}
        ],
        "public_results_table": "az-tilt-public-metrics.json",
        "private_results_columns": ["system_id", "file_name", "run_time", "absolute_error_tilt"]
    }"#;

    #[test]
    fn test_parse_analysis_definition() {
        let definition = AnalysisDefinition::from_json(3, CONFIG.as_bytes()).unwrap();
        assert_eq!(definition.analysis_id, 3);
        assert_eq!(definition.comparison_type, ComparisonType::Scalar);
        assert_eq!(definition.ground_truth_compare, vec!["tilt", "azimuth"]);
        assert_eq!(
            definition.performance_metrics,
            vec![PerformanceMetric::Runtime, PerformanceMetric::AbsoluteError]
        );
        assert_eq!(definition.plots.len(), 2);
        assert_eq!(definition.plots[0].color_code.as_deref(), Some("issue"));
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let config = CONFIG.replace("\"absolute_error\"]", "\"r_squared\"]");
        let err = AnalysisDefinition::from_json(3, config.as_bytes()).unwrap_err();
        assert!(matches!(err, EvaluatorError::InvalidAnalysisConfig(_)));
    }

    #[test]
    fn test_unknown_plot_type_is_rejected() {
        let config = CONFIG.replace("\"scatter_plot\"", "\"violin\"");
        assert!(AnalysisDefinition::from_json(3, config.as_bytes()).is_err());
    }

    #[test]
    fn test_time_series_requires_single_ground_truth_field() {
        let config = CONFIG.replace("\"scalar\"", "\"time_series\"");
        let err = AnalysisDefinition::from_json(3, config.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), evaluator_errors::ErrorKind::Staging);
    }

    #[test]
    fn test_empty_function_name_is_rejected() {
        let config = CONFIG.replace("\"estimate_az_tilt\"", "\"  \"");
        assert!(AnalysisDefinition::from_json(3, config.as_bytes()).is_err());
    }
}
