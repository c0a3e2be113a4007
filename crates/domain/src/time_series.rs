use chrono::{DateTime, NaiveDateTime, Timelike};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use std::collections::BTreeMap;

/// 重采样后的点数上限为输入点数的倍数，且不低于 `MIN_RESAMPLE_LIMIT`
const MAX_RESAMPLE_FACTOR: usize = 100;
const MIN_RESAMPLE_LIMIT: usize = 100_000;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// 按时间排序的观测序列，缺失值记为 NaN
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(points: Vec<(NaiveDateTime, f64)>) -> Self {
        let mut points = points;
        points.sort_by_key(|(ts, _)| *ts);
        let (timestamps, values) = points.into_iter().unzip();
        Self { timestamps, values }
    }

    /// 第一列为时间戳，第二列为数值；首行是表头
    pub fn from_csv(source: &str, content: &str) -> EvaluatorResult<Self> {
        let mut points = Vec::new();
        for (line_no, line) in content.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut cells = line.split(',');
            let raw_ts = cells.next().unwrap_or_default().trim().trim_matches('"');
            let raw_value = cells.next().map(|c| c.trim().trim_matches('"')).ok_or_else(|| {
                EvaluatorError::Serialization(format!(
                    "{source}:{} expected at least two columns",
                    line_no + 1
                ))
            })?;

            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
                EvaluatorError::Serialization(format!(
                    "{source}:{} invalid timestamp {raw_ts:?}",
                    line_no + 1
                ))
            })?;
            let value = parse_value(raw_value).ok_or_else(|| {
                EvaluatorError::Serialization(format!(
                    "{source}:{} invalid value {raw_value:?}",
                    line_no + 1
                ))
            })?;
            points.push((timestamp, value));
        }
        Ok(Self::new(points))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    /// 按固定分钟间隔分桶取均值，空桶为 NaN
    ///
    /// 时间跨度相对点数过大（例如混入一个离群时间戳）时返回 `InvalidDataFile`。
    pub fn resample(&self, source: &str, frequency_minutes: f64) -> EvaluatorResult<Self> {
        let step = (frequency_minutes * 60.0).round() as i64;
        if step <= 0 || self.is_empty() {
            return Ok(self.clone());
        }

        let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for (ts, value) in self.timestamps.iter().zip(&self.values) {
            let seconds = ts.and_utc().timestamp();
            let bucket = seconds.div_euclid(step) * step;
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            if !value.is_nan() {
                entry.0 += value;
                entry.1 += 1;
            }
        }

        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            return Ok(Self::default());
        };

        let limit = (self.len() * MAX_RESAMPLE_FACTOR).max(MIN_RESAMPLE_LIMIT);
        let span = (last - first) / step + 1;
        let bucket_count = usize::try_from(span).unwrap_or(usize::MAX);
        if bucket_count > limit {
            return Err(EvaluatorError::InvalidDataFile {
                file_name: source.to_string(),
                reason: format!(
                    "resampling {} points at {frequency_minutes} min spans {bucket_count} intervals (limit {limit})",
                    self.len()
                ),
            });
        }

        let mut timestamps = Vec::with_capacity(bucket_count);
        let mut values = Vec::with_capacity(bucket_count);
        let mut bucket = first;
        while bucket <= last {
            let value = match buckets.get(&bucket) {
                Some((sum, count)) if *count > 0 => sum / *count as f64,
                _ => f64::NAN,
            };
            if let Some(ts) = DateTime::from_timestamp(bucket, 0) {
                timestamps.push(ts.naive_utc());
                values.push(value);
            }
            bucket += step;
        }
        Ok(Self { timestamps, values })
    }

    /// 用于传给提交进程的 JSON 形式：[[iso 时间, 值或 null], ...]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.timestamps
                .iter()
                .zip(&self.values)
                .map(|(ts, value)| {
                    let ts = if ts.nanosecond() == 0 {
                        ts.format("%Y-%m-%dT%H:%M:%S").to_string()
                    } else {
                        ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
                    };
                    let value = serde_json::Number::from_f64(*value)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null);
                    serde_json::json!([ts, value])
                })
                .collect(),
        )
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn parse_value(raw: &str) -> Option<f64> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("null") {
        return Some(f64::NAN);
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "measured_on,ac_power\n\
        2023-01-01 00:00:00,1.0\n\
        2023-01-01 00:05:00,3.0\n\
        2023-01-01 00:10:00,\n\
        2023-01-01 00:30:00,4.0\n";

    #[test]
    fn test_from_csv() {
        let series = TimeSeries::from_csv("a.csv", CSV).unwrap();
        assert_eq!(series.len(), 4);
        assert_eq!(series.values()[0], 1.0);
        assert!(series.values()[2].is_nan());
    }

    #[test]
    fn test_from_csv_rejects_bad_rows() {
        assert!(TimeSeries::from_csv("a.csv", "t,v\nnot-a-date,1.0\n").is_err());
        assert!(TimeSeries::from_csv("a.csv", "t,v\n2023-01-01 00:00:00,abc\n").is_err());
        assert!(TimeSeries::from_csv("a.csv", "t,v\n2023-01-01 00:00:00\n").is_err());
    }

    #[test]
    fn test_resample_bucket_mean_and_gaps() {
        let series = TimeSeries::from_csv("a.csv", CSV).unwrap();
        let resampled = series.resample("a.csv", 15.0).unwrap();
        // 00:00, 00:15, 00:30
        assert_eq!(resampled.len(), 3);
        assert_eq!(resampled.values()[0], 2.0);
        assert!(resampled.values()[1].is_nan());
        assert_eq!(resampled.values()[2], 4.0);
    }

    #[test]
    fn test_resample_with_invalid_frequency_is_identity() {
        let series = TimeSeries::from_csv("a.csv", CSV).unwrap();
        assert_eq!(series.resample("a.csv", 0.0).unwrap().len(), series.len());
    }

    #[test]
    fn test_resample_rejects_outlier_timestamp_span() {
        let series = TimeSeries::from_csv(
            "a.csv",
            "t,v
2023-01-01 00:00:00,1.0
2023-01-01 00:15:00,2.0
2999-01-01 00:00:00,3.0
",
        )
        .unwrap();
        let err = series.resample("a.csv", 1.0).unwrap_err();
        assert!(matches!(
            err,
            EvaluatorError::InvalidDataFile { ref file_name, .. } if file_name == "a.csv"
        ));
        assert_eq!(err.kind(), evaluator_errors::ErrorKind::Staging);

        // 稀疏但跨度合理的序列仍然允许
        let sparse = TimeSeries::from_csv(
            "b.csv",
            "t,v
2023-01-01 00:00:00,1.0
2023-03-01 00:00:00,2.0
",
        )
        .unwrap();
        assert_eq!(sparse.resample("b.csv", 15.0).unwrap().len(), 5_665);
    }

    #[test]
    fn test_to_json_marks_missing_values_null() {
        let series = TimeSeries::from_csv("a.csv", CSV).unwrap();
        let json = series.to_json();
        assert_eq!(json[0][0], "2023-01-01T00:00:00");
        assert_eq!(json[0][1], 1.0);
        assert!(json[2][1].is_null());
    }

    #[test]
    fn test_parse_rfc3339_timestamps() {
        let series =
            TimeSeries::from_csv("a.csv", "t,v\n2023-01-01T01:00:00+01:00,2.5\n").unwrap();
        assert_eq!(
            series.timestamps()[0],
            NaiveDateTime::parse_from_str("2023-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
        );
    }
}
