use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use evaluator_domain::{
    EvaluationOutcome, JobResult, PerFileResult, PlotSpec, PlotType, ReportArtifact, ResultsTable,
};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::harness_loader::LoadedHarness;
use super::plots;
use super::scoring::{mean, median};
use super::submission_loader::LoadedSubmission;

pub const PRIVATE_RESULTS_FILE: &str = "private_results.csv";
pub const FAILURES_FILE: &str = "failures.csv";

type Row = BTreeMap<String, Value>;

/// 汇总逐文件结果并写出报告产物
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    results_dir: PathBuf,
}

impl ReportBuilder {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub async fn build(
        &self,
        harness: &LoadedHarness,
        submission: &LoadedSubmission,
        outcome: &EvaluationOutcome,
    ) -> EvaluatorResult<JobResult> {
        tokio::fs::create_dir_all(&self.results_dir).await?;
        let definition = &harness.definition;

        let public_metrics = public_metrics(submission, outcome);
        let mut artifacts = Vec::new();

        let public_json = serde_json::to_vec_pretty(&public_metrics)?;
        artifacts.push(
            self.write_artifact(&definition.public_results_table, &public_json)
                .await?,
        );

        let rows = private_rows(harness, &outcome.results);
        let private_table = project(&rows, &definition.private_results_columns);
        artifacts.push(
            self.write_artifact(PRIVATE_RESULTS_FILE, to_csv(&private_table).as_bytes())
                .await?,
        );

        let failures = ResultsTable {
            columns: vec!["file_name".to_string(), "reason".to_string()],
            rows: outcome
                .failures
                .iter()
                .map(|f| vec![f.file_name.clone(), f.reason.clone()])
                .collect(),
        };
        artifacts.push(
            self.write_artifact(FAILURES_FILE, to_csv(&failures).as_bytes())
                .await?,
        );

        // 图表失败不影响任务结果
        let mut warnings: Vec<String> = outcome
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.file_name, f.reason))
            .collect();
        for spec in &definition.plots {
            match self.render_plot(spec, &rows).await {
                Ok(mut written) => artifacts.append(&mut written),
                Err(e) => {
                    warn!("Plot {} skipped: {}", spec.save_file_path, e);
                    warnings.push(format!("plot {}: {}", spec.save_file_path, e));
                }
            }
        }

        info!(
            "Report built with {} artifacts and {} warnings",
            artifacts.len(),
            warnings.len()
        );
        Ok(JobResult {
            public_metrics,
            private_table,
            artifacts,
            warnings,
            total_files: outcome.total_files,
            failed_files: outcome.failures.len(),
            success_rate: outcome.success_rate(),
        })
    }

    async fn write_artifact(&self, name: &str, content: &[u8]) -> EvaluatorResult<ReportArtifact> {
        let path = self.results_dir.join(name);
        tokio::fs::write(&path, content).await?;
        Ok(ReportArtifact {
            name: name.to_string(),
            path,
        })
    }

    async fn render_plot(
        &self,
        spec: &PlotSpec,
        rows: &[Row],
    ) -> EvaluatorResult<Vec<ReportArtifact>> {
        let svg_name = Path::new(&spec.save_file_path)
            .with_extension("svg")
            .to_string_lossy()
            .into_owned();
        let title = spec.title.clone().unwrap_or_else(|| spec.x_val.clone());
        let mut written = Vec::new();

        let svg = match spec.plot_type {
            PlotType::Histogram => {
                let values = column_values(rows, &spec.x_val)?;
                if let Some(color_code) = &spec.color_code {
                    let pairs: Vec<(String, f64)> = rows
                        .iter()
                        .filter_map(|row| {
                            let value = row.get(&spec.x_val).and_then(Value::as_f64)?;
                            Some((cell_text(row.get(color_code)?), value))
                        })
                        .collect();
                    let table = ResultsTable {
                        columns: vec![
                            color_code.clone(),
                            "count".to_string(),
                            format!("mean_{}", spec.x_val),
                        ],
                        rows: plots::stratified_means(&pairs)
                            .into_iter()
                            .map(|(group, count, mean)| {
                                vec![group, count.to_string(), mean.to_string()]
                            })
                            .collect(),
                    };
                    let csv_name = Path::new(&svg_name)
                        .with_extension("csv")
                        .to_string_lossy()
                        .into_owned();
                    written.push(self.write_artifact(&csv_name, to_csv(&table).as_bytes()).await?);
                }
                plots::histogram_svg(&title, &spec.x_val, &values, plots::DEFAULT_BINS)
            }
            PlotType::ScatterPlot => {
                let y_val = spec.y_val.as_deref().ok_or_else(|| {
                    EvaluatorError::Report("scatter_plot requires y_val".to_string())
                })?;
                let points: Vec<(f64, f64)> = rows
                    .iter()
                    .filter_map(|row| {
                        Some((
                            row.get(&spec.x_val)?.as_f64()?,
                            row.get(y_val)?.as_f64()?,
                        ))
                    })
                    .collect();
                plots::scatter_svg(&title, &spec.x_val, y_val, &points)
            }
        };

        let svg = svg.ok_or_else(|| {
            EvaluatorError::Report(format!("no numeric values for {}", spec.x_val))
        })?;
        written.push(self.write_artifact(&svg_name, svg.as_bytes()).await?);
        Ok(written)
    }
}

fn public_metrics(
    submission: &LoadedSubmission,
    outcome: &EvaluationOutcome,
) -> Map<String, Value> {
    let mut metrics = Map::new();
    metrics.insert("module".to_string(), json!(submission.module));
    metrics.insert("function_name".to_string(), json!(submission.function_name));

    let run_times: Vec<f64> = outcome.results.iter().map(|r| r.run_time_seconds).collect();
    metrics.insert("mean_run_time".to_string(), number(mean(&run_times)));
    metrics.insert("median_run_time".to_string(), number(median(&run_times)));

    let mut error_metrics: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for result in &outcome.results {
        for (name, value) in &result.metrics {
            if name.contains("absolute_error") {
                error_metrics.entry(name.as_str()).or_default().push(*value);
            }
        }
    }
    for (name, values) in &error_metrics {
        metrics.insert(format!("mean_{name}"), number(mean(values)));
        metrics.insert(format!("median_{name}"), number(median(values)));
    }

    metrics.insert(
        "function_parameters".to_string(),
        json!(submission.parameter_names),
    );
    metrics.insert(
        "data_requirements".to_string(),
        json!(outcome.data_requirements),
    );
    metrics.insert("total_files".to_string(), json!(outcome.total_files));
    metrics.insert("failed_files".to_string(), json!(outcome.failures.len()));
    metrics.insert("success_rate".to_string(), number(Some(outcome.success_rate())));
    metrics
}

fn number(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// 逐文件结果与该文件的元数据合并成一行
fn private_rows(harness: &LoadedHarness, results: &[PerFileResult]) -> Vec<Row> {
    results
        .iter()
        .map(|result| {
            let mut row: Row = harness
                .table
                .iter()
                .find(|case| case.file_name() == result.file_name)
                .map(|case| case.candidate_arguments())
                .unwrap_or_default();
            row.insert("file_name".to_string(), json!(result.file_name));
            row.insert("run_time".to_string(), json!(result.run_time_seconds));
            row.insert(
                "data_requirements".to_string(),
                json!(result.data_requirements),
            );
            for (name, value) in &result.metrics {
                row.insert(name.clone(), Value::from(*value));
            }
            row
        })
        .collect()
}

/// 未配置列时输出全部列；缺失的列为空单元格
fn project(rows: &[Row], columns: &[String]) -> ResultsTable {
    let columns: Vec<String> = if columns.is_empty() {
        let mut all: Vec<String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !all.contains(key) {
                    all.push(key.clone());
                }
            }
        }
        all
    } else {
        columns.to_vec()
    };

    let rows = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| row.get(column).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();
    ResultsTable { columns, rows }
}

fn column_values(rows: &[Row], column: &str) -> EvaluatorResult<Vec<f64>> {
    if !rows.iter().any(|row| row.contains_key(column)) {
        return Err(EvaluatorError::Report(format!("unknown column {column}")));
    }
    Ok(rows
        .iter()
        .filter_map(|row| row.get(column).and_then(Value::as_f64))
        .collect())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

fn csv_cell(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

pub fn to_csv(table: &ResultsTable) -> String {
    let mut out = String::new();
    let mut push_line = |cells: &[String]| {
        let line: Vec<String> = cells.iter().map(|c| csv_cell(c)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    };
    push_line(&table.columns);
    for row in &table.rows {
        push_line(row);
    }
    out
}
