use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use evaluator_domain::{
    AnalysisDefinition, CandidateArguments, ComparisonType, EvaluationOutcome, FileOutcome,
    FileTestCase, PerFileFailure, PerFileResult, TimeSeries,
};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use tracing::{debug, info, warn};

use super::harness_loader::LoadedHarness;
use super::predictors::PredictorInvocation;
use super::scoring;
use super::submission_loader::LoadedSubmission;

/// 单个文件的真值
#[derive(Debug, Clone)]
enum GroundTruth {
    Scalars(BTreeMap<String, f64>),
    Series { field: String, values: Vec<f64> },
}

/// 逐文件执行提交函数，带早期失败熔断
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    early_failure_threshold: usize,
    per_file_timeout: Option<Duration>,
}

impl EvaluationEngine {
    pub fn new(early_failure_threshold: usize, per_file_timeout: Option<Duration>) -> Self {
        Self {
            early_failure_threshold,
            per_file_timeout,
        }
    }

    pub async fn evaluate(
        &self,
        harness: &LoadedHarness,
        submission: &LoadedSubmission,
    ) -> EvaluatorResult<EvaluationOutcome> {
        let threshold = self.early_failure_threshold;
        let mut outcome = EvaluationOutcome {
            total_files: harness.table.len(),
            data_requirements: submission.data_requirements(),
            ..Default::default()
        };

        for (index, case) in harness.table.iter().enumerate() {
            let file_outcome = self.evaluate_file(harness, submission, case).await?;
            metrics::counter!("evaluator_files_evaluated_total").increment(1);
            match file_outcome {
                FileOutcome::Success(result) => {
                    debug!(
                        "File {} evaluated in {:.3}s",
                        result.file_name, result.run_time_seconds
                    );
                    metrics::histogram!("evaluator_file_runtime_seconds")
                        .record(result.run_time_seconds);
                    outcome.results.push(result);
                }
                FileOutcome::Failure(failure) => {
                    warn!(
                        "File {} failed ({}/{}): {}",
                        failure.file_name,
                        index + 1,
                        outcome.total_files,
                        failure.reason
                    );
                    metrics::counter!("evaluator_file_failures_total").increment(1);
                    outcome.failures.push(failure);

                    if index < threshold && outcome.failures.len() >= threshold {
                        return Err(EvaluatorError::TooManyEarlyFailures {
                            failures: outcome.failures.len(),
                            threshold,
                        });
                    }
                }
            }
        }

        if outcome.results.is_empty() {
            return Err(EvaluatorError::NoSuccessfulResults);
        }

        info!(
            "Evaluated {} files, {} failed, success rate {:.2}",
            outcome.total_files,
            outcome.failures.len(),
            outcome.success_rate()
        );
        Ok(outcome)
    }

    /// 提交函数自身的错误记为该文件失败；harness 数据问题直接返回错误
    async fn evaluate_file(
        &self,
        harness: &LoadedHarness,
        submission: &LoadedSubmission,
        case: &FileTestCase,
    ) -> EvaluatorResult<FileOutcome> {
        let definition = &harness.definition;
        let file_name = case.file_name().to_string();
        let candidates = case.candidate_arguments();

        let truth = resolve_ground_truth(definition, &candidates, harness, &file_name).await?;
        let mut series = read_series(&harness.analytical_path(&file_name), &file_name).await?;
        if let Some(frequency) = case.file.data_sampling_frequency {
            series = series.resample(&file_name, frequency)?;
        }

        let kwargs = select_kwargs(submission, definition, &candidates);
        let data_requirements: Vec<String> = kwargs.keys().cloned().collect();
        let invocation = PredictorInvocation {
            function: submission.function_name.clone(),
            series,
            kwargs,
        };

        let started = Instant::now();
        let invoked = match self.per_file_timeout {
            Some(limit) => tokio::time::timeout(limit, submission.predictor.invoke(&invocation))
                .await
                .unwrap_or(Err(EvaluatorError::InvocationTimeout {
                    seconds: limit.as_secs(),
                })),
            None => submission.predictor.invoke(&invocation).await,
        };
        let run_time_seconds = started.elapsed().as_secs_f64();

        let scored = invoked.and_then(|output| score(definition, submission, &output, &truth));
        Ok(match scored {
            Ok(metrics) => FileOutcome::Success(PerFileResult {
                file_name,
                run_time_seconds,
                data_requirements,
                metrics,
            }),
            Err(e) => FileOutcome::Failure(PerFileFailure {
                file_name,
                reason: e.to_string(),
            }),
        })
    }
}

fn score(
    definition: &AnalysisDefinition,
    submission: &LoadedSubmission,
    output: &serde_json::Value,
    truth: &GroundTruth,
) -> EvaluatorResult<BTreeMap<String, f64>> {
    match truth {
        GroundTruth::Scalars(expected) => {
            let predicted = scoring::normalize_scalar_output(
                output,
                &definition.ground_truth_compare,
                submission.outputs.as_deref(),
            )?;
            Ok(scoring::scalar_metrics(
                &definition.performance_metrics,
                &predicted,
                expected,
            ))
        }
        GroundTruth::Series { field, values } => {
            let predicted = scoring::normalize_series_output(output, field)?;
            if predicted.len() != values.len() {
                return Err(EvaluatorError::OutputShapeMismatch {
                    expected: values.len(),
                    actual: predicted.len(),
                });
            }
            scoring::series_metrics(&definition.performance_metrics, field, &predicted, values)
        }
    }
}

/// 只传递提交声明过、且在允许列表中的字段；第一个形参接收主序列
fn select_kwargs(
    submission: &LoadedSubmission,
    definition: &AnalysisDefinition,
    candidates: &CandidateArguments,
) -> BTreeMap<String, serde_json::Value> {
    submission
        .parameter_names
        .iter()
        .skip(1)
        .filter(|name| definition.allowable_kwargs.contains(name))
        .filter_map(|name| candidates.get(name).map(|v| (name.clone(), v.clone())))
        .collect()
}

async fn resolve_ground_truth(
    definition: &AnalysisDefinition,
    candidates: &CandidateArguments,
    harness: &LoadedHarness,
    file_name: &str,
) -> EvaluatorResult<GroundTruth> {
    match definition.comparison_type {
        ComparisonType::Scalar => {
            let mut values = BTreeMap::new();
            for field in &definition.ground_truth_compare {
                let value = candidates
                    .get(field)
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| EvaluatorError::MissingDataFile {
                        kind: format!("ground truth field {field} for"),
                        file_name: file_name.to_string(),
                    })?;
                values.insert(field.clone(), value);
            }
            Ok(GroundTruth::Scalars(values))
        }
        ComparisonType::TimeSeries => {
            let series = read_series(&harness.ground_truth_path(file_name), file_name).await?;
            Ok(GroundTruth::Series {
                field: definition.ground_truth_compare[0].clone(),
                values: series.values().to_vec(),
            })
        }
    }
}

async fn read_series(path: &Path, file_name: &str) -> EvaluatorResult<TimeSeries> {
    let content = tokio::fs::read_to_string(path).await?;
    TimeSeries::from_csv(file_name, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::predictors::Predictor;
    use async_trait::async_trait;
    use evaluator_domain::{FileMetadata, SystemMetadata};
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use metrics::{
        Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString,
        Unit,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const SERIES: &str = "timestamp,value\n2023-01-01 00:00:00,1.0\n2023-01-01 00:15:00,2.0\n";

    /// 按调用次序返回预设结果
    struct ScriptedPredictor {
        responses: Vec<Result<Value, String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Predictor for ScriptedPredictor {
        fn parameter_names(&self) -> Vec<String> {
            vec!["time_series".to_string(), "latitude".to_string()]
        }

        async fn invoke(&self, _invocation: &PredictorInvocation) -> EvaluatorResult<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.responses[call % self.responses.len()] {
                Ok(value) => Ok(value.clone()),
                Err(reason) => Err(EvaluatorError::invocation(reason.clone())),
            }
        }
    }

    struct Tally(Arc<AtomicU64>);

    impl CounterFn for Tally {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::SeqCst);
        }

        fn absolute(&self, value: u64) {
            self.0.store(value, Ordering::SeqCst);
        }
    }

    /// 只统计计数器的本地 recorder
    #[derive(Default)]
    struct CountingRecorder {
        counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
    }

    impl CountingRecorder {
        fn count(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(name)
                .map_or(0, |cell| cell.load(Ordering::SeqCst))
        }
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let cell = self
                .counters
                .lock()
                .unwrap()
                .entry(key.name().to_string())
                .or_default()
                .clone();
            Counter::from_arc(Arc::new(Tally(cell)))
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    async fn harness(dir: &TempDir, files: usize) -> LoadedHarness {
        let definition = AnalysisDefinition::from_json(
            1,
            json!({
                "function_name": "estimate_tilt",
                "comparison_type": "scalar",
                "ground_truth_compare": ["tilt"],
                "allowable_kwargs": ["latitude"],
                "performance_metrics": ["runtime", "absolute_error"],
                "public_results_table": "public.json"
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();

        let data_dir = dir.path().join("data");
        tokio::fs::create_dir_all(data_dir.join("analytical")).await.unwrap();
        let mut table = Vec::new();
        for i in 0..files {
            let file_name = format!("{i}.csv");
            tokio::fs::write(data_dir.join("analytical").join(&file_name), SERIES)
                .await
                .unwrap();
            table.push(FileTestCase::new(
                FileMetadata {
                    file_id: i as i64,
                    file_name,
                    system_id: 1,
                    data_sampling_frequency: Some(15.0),
                    issue: None,
                    subissue: None,
                },
                SystemMetadata {
                    system_id: 1,
                    name: None,
                    azimuth: Some(180.0),
                    tilt: Some(25.0),
                    elevation: None,
                    latitude: Some(39.7),
                    longitude: Some(-105.2),
                    tracking: None,
                    dc_capacity: None,
                },
            ));
        }

        LoadedHarness {
            definition,
            table,
            harness_dir: dir.path().join("harness"),
            data_dir,
        }
    }

    fn submission(responses: Vec<Result<Value, String>>) -> LoadedSubmission {
        let predictor = Arc::new(ScriptedPredictor {
            responses,
            calls: AtomicUsize::new(0),
        });
        LoadedSubmission {
            module: "test_module".to_string(),
            function_name: "estimate_tilt".to_string(),
            parameter_names: predictor.parameter_names(),
            outputs: None,
            predictor,
            source_dir: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn test_all_files_succeed() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir, 3).await;
        let engine = EvaluationEngine::new(4, None);

        let outcome = engine
            .evaluate(&harness, &submission(vec![Ok(json!(27.0))]))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.results[0].metrics["absolute_error_tilt"], 2.0);
        assert_eq!(outcome.results[0].data_requirements, vec!["latitude"]);
        assert_eq!(outcome.data_requirements, vec!["latitude"]);
    }

    #[tokio::test]
    async fn test_circuit_breaker_trips_on_first_four_failures() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir, 6).await;
        let engine = EvaluationEngine::new(4, None);

        let err = engine
            .evaluate(&harness, &submission(vec![Err("boom".to_string())]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluatorError::TooManyEarlyFailures {
                failures: 4,
                threshold: 4
            }
        ));
    }

    #[test]
    fn test_tripping_file_is_counted_as_evaluated() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let dir = TempDir::new().unwrap();
                let harness = harness(&dir, 6).await;
                let err = EvaluationEngine::new(4, None)
                    .evaluate(&harness, &submission(vec![Err("boom".to_string())]))
                    .await
                    .unwrap_err();
                assert!(matches!(err, EvaluatorError::TooManyEarlyFailures { .. }));
            });
        });
        assert_eq!(recorder.count("evaluator_file_failures_total"), 4);
        assert_eq!(recorder.count("evaluator_files_evaluated_total"), 4);
    }

    #[tokio::test]
    async fn test_breaker_does_not_trip_after_early_success() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir, 6).await;
        let engine = EvaluationEngine::new(4, None);

        let responses = vec![
            Ok(json!(25.0)),
            Err("a".to_string()),
            Err("b".to_string()),
            Err("c".to_string()),
            Err("d".to_string()),
            Ok(json!(25.0)),
        ];
        let outcome = engine
            .evaluate(&harness, &submission(responses))
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failures.len(), 4);
        assert!((outcome.success_rate() - 2.0 / 6.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_no_successful_results() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir, 2).await;
        let engine = EvaluationEngine::new(4, None);

        let err = engine
            .evaluate(&harness, &submission(vec![Err("boom".to_string())]))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluatorError::NoSuccessfulResults));
    }

    #[tokio::test]
    async fn test_missing_scalar_ground_truth_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut harness = harness(&dir, 1).await;
        harness.table[0].system.tilt = None;
        let engine = EvaluationEngine::new(4, None);

        let err = engine
            .evaluate(&harness, &submission(vec![Ok(json!(25.0))]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), evaluator_errors::ErrorKind::Staging);
    }

    #[tokio::test]
    async fn test_select_kwargs_filters_by_declaration_and_allow_list() {
        let dir = TempDir::new().unwrap();
        let mut harness = harness(&dir, 1).await;
        harness.definition.allowable_kwargs = vec!["longitude".to_string()];
        let submission = submission(vec![Ok(json!(25.0))]);

        let kwargs = select_kwargs(
            &submission,
            &harness.definition,
            &harness.table[0].candidate_arguments(),
        );
        // latitude 被声明但不在允许列表，longitude 在允许列表但未声明
        assert!(kwargs.is_empty());
    }
}
