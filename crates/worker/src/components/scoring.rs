//! 输出规整与误差指标

use std::collections::BTreeMap;

use evaluator_domain::PerformanceMetric;
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde_json::Value;

/// 标量比较：把提交输出映射到各个真值字段
///
/// - 数字：只有一个真值字段时直接对应
/// - 数组：按 `outputs` 声明的名称（否则按真值字段顺序）逐位对应
/// - 对象：按字段名对应
pub fn normalize_scalar_output(
    output: &Value,
    ground_truth_fields: &[String],
    declared_outputs: Option<&[String]>,
) -> EvaluatorResult<BTreeMap<String, f64>> {
    let named: BTreeMap<String, f64> = match output {
        Value::Number(_) => {
            if ground_truth_fields.len() != 1 {
                return Err(EvaluatorError::OutputShapeMismatch {
                    expected: ground_truth_fields.len(),
                    actual: 1,
                });
            }
            BTreeMap::from([(ground_truth_fields[0].clone(), as_number(output)?)])
        }
        Value::Array(values) => {
            let names = declared_outputs.unwrap_or(ground_truth_fields);
            if values.len() != names.len() {
                return Err(EvaluatorError::OutputShapeMismatch {
                    expected: names.len(),
                    actual: values.len(),
                });
            }
            names
                .iter()
                .zip(values)
                .map(|(name, value)| Ok((name.clone(), as_number(value)?)))
                .collect::<EvaluatorResult<_>>()?
        }
        Value::Object(map) => map
            .iter()
            .filter(|(name, _)| ground_truth_fields.contains(name))
            .map(|(name, value)| Ok((name.clone(), as_number(value)?)))
            .collect::<EvaluatorResult<_>>()?,
        other => {
            return Err(EvaluatorError::invocation(format!(
                "unsupported output type: {other}"
            )))
        }
    };

    for field in ground_truth_fields {
        if !named.contains_key(field) {
            return Err(EvaluatorError::invocation(format!(
                "output is missing ground truth field {field}"
            )));
        }
    }
    Ok(named)
}

/// 时间序列比较：输出为数值数组，或以真值字段名为键的数组
pub fn normalize_series_output(output: &Value, field: &str) -> EvaluatorResult<Vec<f64>> {
    let values = match output {
        Value::Array(values) => values,
        Value::Object(map) => match map.get(field) {
            Some(Value::Array(values)) => values,
            _ => {
                return Err(EvaluatorError::invocation(format!(
                    "output object has no series field {field}"
                )))
            }
        },
        other => {
            return Err(EvaluatorError::invocation(format!(
                "expected a series, got {other}"
            )))
        }
    };

    values
        .iter()
        .map(|value| match value {
            Value::Null => Ok(f64::NAN),
            _ => as_number(value),
        })
        .collect()
}

fn as_number(value: &Value) -> EvaluatorResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| EvaluatorError::invocation(format!("non-numeric output value: {value}")))
}

/// 标量指标，键为 `{metric}_{field}`
pub fn scalar_metrics(
    metrics: &[PerformanceMetric],
    predicted: &BTreeMap<String, f64>,
    truth: &BTreeMap<String, f64>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (field, expected) in truth {
        let Some(actual) = predicted.get(field) else {
            continue;
        };
        let diff = actual - expected;
        for metric in metrics {
            let value = match metric {
                PerformanceMetric::Runtime => continue,
                PerformanceMetric::Error => diff,
                PerformanceMetric::AbsoluteError
                | PerformanceMetric::MeanAbsoluteError
                | PerformanceMetric::RootMeanSquaredError => diff.abs(),
            };
            out.insert(format!("{}_{}", metric.as_str(), field), value);
        }
    }
    out
}

/// 序列指标，缺失点按对跳过
pub fn series_metrics(
    metrics: &[PerformanceMetric],
    field: &str,
    predicted: &[f64],
    truth: &[f64],
) -> EvaluatorResult<BTreeMap<String, f64>> {
    let diffs: Vec<f64> = predicted
        .iter()
        .zip(truth)
        .filter(|(p, t)| !p.is_nan() && !t.is_nan())
        .map(|(p, t)| p - t)
        .collect();
    if diffs.is_empty() {
        return Err(EvaluatorError::invocation(
            "output and ground truth share no comparable points",
        ));
    }
    let n = diffs.len() as f64;
    let mean_abs = diffs.iter().map(|d| d.abs()).sum::<f64>() / n;
    let rmse = (diffs.iter().map(|d| d * d).sum::<f64>() / n).sqrt();

    let mut out = BTreeMap::new();
    for metric in metrics {
        let value = match metric {
            PerformanceMetric::AbsoluteError | PerformanceMetric::MeanAbsoluteError => mean_abs,
            PerformanceMetric::RootMeanSquaredError => rmse,
            PerformanceMetric::Runtime | PerformanceMetric::Error => continue,
        };
        out.insert(format!("{}_{}", metric.as_str(), field), value);
    }
    Ok(out)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}
