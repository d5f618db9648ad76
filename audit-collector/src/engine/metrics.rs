//! Windowed metric aggregation
//!
//! A [`MetricWindow`] fixes the trailing time range, the bucket period and the
//! statistic. [`WindowedAggregator`] turns provider buckets into one
//! [`MetricValue`], either directly or fanned out over sub-resources.
//!
//! Failure is carried in the value itself: [`MetricValue::Failed`] renders as
//! [`FAILURE_SENTINEL`] and is never equal to a legitimate zero.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::collector_core::{MetricSource, ResourceDescriptor, SubresourceDiscovery};
use crate::error::AuditError;

/// Value written to the report when a metric could not be determined.
pub const FAILURE_SENTINEL: i64 = -1;

/// CloudWatch returns at most this many datapoints per statistics request.
pub const MAX_DATAPOINTS: i64 = 1440;

/// CloudWatch keeps hourly data for 455 days; nothing older can be queried.
pub const MAX_WINDOW_DAYS: u32 = 455;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Sum,
    Average,
    Max,
}

impl Statistic {
    /// Combine per-bucket values. No buckets means no usage.
    pub fn combine(&self, buckets: &[f64]) -> f64 {
        if buckets.is_empty() {
            return 0.0;
        }
        match self {
            Statistic::Sum => buckets.iter().sum(),
            Statistic::Average => buckets.iter().sum::<f64>() / buckets.len() as f64,
            Statistic::Max => buckets.iter().copied().fold(f64::MIN, f64::max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPeriod {
    Hourly,
    Daily,
    /// One bucket spanning the whole window.
    WholeWindow,
}

impl BucketPeriod {
    /// Hourly buckets over more than 60 days exceed [`MAX_DATAPOINTS`]; those windows go daily.
    pub fn fitted(self, window_days: u32) -> BucketPeriod {
        match self {
            BucketPeriod::Hourly if i64::from(window_days) * 24 > MAX_DATAPOINTS => BucketPeriod::Daily,
            other => other,
        }
    }

    fn duration(&self, window_days: u32) -> Duration {
        match self.fitted(window_days) {
            BucketPeriod::Hourly => Duration::hours(1),
            BucketPeriod::Daily => Duration::days(1),
            BucketPeriod::WholeWindow => Duration::days(i64::from(window_days)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: Duration,
    statistic: Statistic,
}

impl MetricWindow {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Duration,
        statistic: Statistic,
    ) -> Result<Self, AuditError> {
        if start >= end {
            return Err(AuditError::InvalidWindow(format!(
                "start {} is not before end {}",
                start, end
            )));
        }
        let period_secs = period.num_seconds();
        if period_secs <= 0 {
            return Err(AuditError::InvalidWindow(format!(
                "period must be positive, got {}s",
                period_secs
            )));
        }
        let length = (end - start).num_seconds();
        if length % period_secs != 0 {
            return Err(AuditError::InvalidWindow(format!(
                "period {}s does not divide window length {}s",
                period_secs, length
            )));
        }
        if length / period_secs > MAX_DATAPOINTS {
            return Err(AuditError::InvalidWindow(format!(
                "{} buckets exceed the {} datapoint limit",
                length / period_secs,
                MAX_DATAPOINTS
            )));
        }
        Ok(Self {
            start,
            end,
            period,
            statistic,
        })
    }

    /// Window of `days` ending at `end`. Hourly periods are coarsened when they
    /// would not fit one request.
    pub fn trailing(
        end: DateTime<Utc>,
        days: u32,
        period: BucketPeriod,
        statistic: Statistic,
    ) -> Result<Self, AuditError> {
        if days > MAX_WINDOW_DAYS {
            return Err(AuditError::InvalidWindow(format!(
                "{} days exceeds the {} day retention",
                days, MAX_WINDOW_DAYS
            )));
        }
        let start = end
            .checked_sub_signed(Duration::days(i64::from(days)))
            .ok_or_else(|| AuditError::InvalidWindow(format!("{} days before {} is out of range", days, end)))?;
        Self::new(start, end, period.duration(days), statistic)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    pub fn bucket_count(&self) -> i64 {
        (self.end - self.start).num_seconds() / self.period.num_seconds()
    }

    pub fn days(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 86_400.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    pub unit: Option<String>,
}

impl MetricQuery {
    /// `Metric|Name=value,Name=value`, used in log lines and by the mock provider.
    pub fn key(&self) -> String {
        let dims: Vec<String> = self
            .dimensions
            .iter()
            .map(|d| format!("{}={}", d.name, d.value))
            .collect();
        format!("{}|{}", self.metric_name, dims.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Value(f64),
    Failed,
}

impl MetricValue {
    pub fn is_failed(&self) -> bool {
        matches!(self, MetricValue::Failed)
    }

    /// Normalize a window total to a per-day average.
    pub fn per_day(self, days: f64) -> Self {
        match self {
            MetricValue::Value(v) if days > 0.0 => MetricValue::Value(v / days),
            other => other,
        }
    }

    /// Report cell: whole numbers as integers, fractions rounded to 2 places.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetricValue::Failed => serde_json::json!(FAILURE_SENTINEL),
            MetricValue::Value(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                serde_json::json!(*v as i64)
            }
            MetricValue::Value(v) => serde_json::json!((v * 100.0).round() / 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMetric {
    pub name: String,
    pub value: MetricValue,
}

impl AggregatedMetric {
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

pub type DimensionFn = fn(&ResourceDescriptor) -> Vec<Dimension>;
pub type SubDimensionFn = fn(&ResourceDescriptor, &str) -> Vec<Dimension>;

#[derive(Debug, Clone, Copy)]
pub enum MetricScope {
    Resource(DimensionFn),
    /// Fan out over the sub-resources reported by the kind's discovery capability.
    Subresources(SubDimensionFn),
}

/// Declarative description of one metric column.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub column: &'static str,
    pub namespace: &'static str,
    pub metric_name: &'static str,
    pub unit: Option<&'static str>,
    pub statistic: Statistic,
    pub period: BucketPeriod,
    /// Overrides the run's default window length.
    pub window_days: Option<u32>,
    pub per_day: bool,
    pub scope: MetricScope,
}

impl MetricSpec {
    pub fn window(&self, end: DateTime<Utc>, default_days: u32) -> Result<MetricWindow, AuditError> {
        MetricWindow::trailing(
            end,
            self.window_days.unwrap_or(default_days),
            self.period,
            self.statistic,
        )
    }

    pub fn query(&self, dimensions: Vec<Dimension>) -> MetricQuery {
        MetricQuery {
            namespace: self.namespace.to_string(),
            metric_name: self.metric_name.to_string(),
            dimensions,
            unit: self.unit.map(str::to_string),
        }
    }
}

pub struct WindowedAggregator {
    source: Arc<dyn MetricSource>,
}

impl WindowedAggregator {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    pub async fn aggregate(&self, query: &MetricQuery, window: &MetricWindow) -> MetricValue {
        match self.source.datapoints(query, window).await {
            Ok(buckets) => {
                tracing::trace!(metric = %query.key(), buckets = buckets.len(), "Metric buckets fetched");
                MetricValue::Value(window.statistic().combine(&buckets))
            }
            Err(e) => {
                tracing::warn!(metric = %query.key(), error = %e, "Metric query failed");
                MetricValue::Failed
            }
        }
    }

    /// Sum of `aggregate` over every sub-resource of `parent_id`.
    ///
    /// Discovery failure fails the whole value. A failing sub-resource is
    /// excluded from the sum; the value only fails if every sub-resource did.
    pub async fn aggregate_over_subresources<F>(
        &self,
        parent_id: &str,
        discovery: &dyn SubresourceDiscovery,
        query_for: F,
        window: &MetricWindow,
    ) -> MetricValue
    where
        F: Fn(&str) -> MetricQuery,
    {
        let subresources = match discovery.discover(parent_id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(parent = parent_id, error = %e, "Sub-resource discovery failed");
                return MetricValue::Failed;
            }
        };
        if subresources.is_empty() {
            return MetricValue::Value(0.0);
        }

        let queries: Vec<MetricQuery> = subresources.iter().map(|s| query_for(s.as_str())).collect();
        let values = join_all(queries.iter().map(|q| self.aggregate(q, window))).await;

        let mut total = 0.0;
        let mut succeeded = 0usize;
        for (sub, value) in subresources.iter().zip(values) {
            match value {
                MetricValue::Value(v) => {
                    total += v;
                    succeeded += 1;
                }
                MetricValue::Failed => {
                    tracing::warn!(parent = parent_id, subresource = %sub, "Excluding failed sub-resource from total");
                }
            }
        }

        if succeeded == 0 {
            MetricValue::Failed
        } else {
            MetricValue::Value(total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::ResourceKind;
    use crate::mock::MockProvider;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    }

    fn query(metric: &str, dims: &[(&str, &str)]) -> MetricQuery {
        MetricQuery {
            namespace: "AWS/ApiGateway".into(),
            metric_name: metric.into(),
            dimensions: dims.iter().map(|(n, v)| Dimension::new(*n, *v)).collect(),
            unit: Some("Count".into()),
        }
    }

    fn daily_sum_window() -> MetricWindow {
        MetricWindow::trailing(now(), 30, BucketPeriod::Daily, Statistic::Sum).unwrap()
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let err = MetricWindow::new(now(), now(), Duration::hours(1), Statistic::Sum).unwrap_err();
        assert!(matches!(err, AuditError::InvalidWindow(_)));
    }

    #[test]
    fn test_window_rejects_uneven_period() {
        let start = now() - Duration::hours(5);
        let err = MetricWindow::new(start, now(), Duration::hours(2), Statistic::Sum).unwrap_err();
        assert!(err.to_string().contains("does not divide"));
    }

    #[test]
    fn test_trailing_window_bucket_counts() {
        let hourly = MetricWindow::trailing(now(), 30, BucketPeriod::Hourly, Statistic::Sum).unwrap();
        assert_eq!(hourly.bucket_count(), 720);
        let whole = MetricWindow::trailing(now(), 90, BucketPeriod::WholeWindow, Statistic::Sum).unwrap();
        assert_eq!(whole.bucket_count(), 1);
        assert_eq!(whole.days(), 90.0);
    }

    #[test]
    fn test_long_hourly_window_goes_daily() {
        let sixty = MetricWindow::trailing(now(), 60, BucketPeriod::Hourly, Statistic::Sum).unwrap();
        assert_eq!(sixty.bucket_count(), MAX_DATAPOINTS);
        assert_eq!(sixty.period(), Duration::hours(1));

        let ninety = MetricWindow::trailing(now(), 90, BucketPeriod::Hourly, Statistic::Sum).unwrap();
        assert_eq!(ninety.period(), Duration::days(1));
        assert_eq!(ninety.bucket_count(), 90);

        let longest = MetricWindow::trailing(now(), MAX_WINDOW_DAYS, BucketPeriod::Hourly, Statistic::Sum).unwrap();
        assert!(longest.bucket_count() <= MAX_DATAPOINTS);
    }

    #[test]
    fn test_window_beyond_retention_is_rejected() {
        let err = MetricWindow::trailing(now(), 200_000_000, BucketPeriod::Hourly, Statistic::Sum).unwrap_err();
        assert!(matches!(err, AuditError::InvalidWindow(_)));
        assert!(MetricWindow::trailing(now(), MAX_WINDOW_DAYS + 1, BucketPeriod::Daily, Statistic::Sum).is_err());
    }

    #[test]
    fn test_window_start_out_of_range() {
        let end = DateTime::<Utc>::MIN_UTC + Duration::days(1);
        let err = MetricWindow::trailing(end, 30, BucketPeriod::Daily, Statistic::Sum).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_window_rejects_too_many_buckets() {
        let start = now() - Duration::days(61);
        let err = MetricWindow::new(start, now(), Duration::hours(1), Statistic::Sum).unwrap_err();
        assert!(err.to_string().contains("datapoint limit"));
    }

    #[test]
    fn test_statistic_combine() {
        let buckets = [2.0, 4.0, 9.0];
        assert_eq!(Statistic::Sum.combine(&buckets), 15.0);
        assert_eq!(Statistic::Average.combine(&buckets), 5.0);
        assert_eq!(Statistic::Max.combine(&buckets), 9.0);
        assert_eq!(Statistic::Max.combine(&[]), 0.0);
    }

    #[test]
    fn test_failed_value_is_not_zero() {
        assert_ne!(MetricValue::Failed, MetricValue::Value(0.0));
        assert_eq!(MetricValue::Failed.to_json(), serde_json::json!(-1));
        assert_eq!(MetricValue::Value(0.0).to_json(), serde_json::json!(0));
        assert_eq!(MetricValue::Value(10.0 / 3.0).to_json(), serde_json::json!(3.33));
        assert!(MetricValue::Failed.per_day(30.0).is_failed());
    }

    #[tokio::test]
    async fn test_aggregate_zero_buckets_is_zero() {
        let provider = Arc::new(MockProvider::default());
        let agg = WindowedAggregator::new(provider);
        let value = agg
            .aggregate(&query("Count", &[("ApiId", "a1")]), &daily_sum_window())
            .await;
        assert_eq!(value, MetricValue::Value(0.0));
    }

    #[tokio::test]
    async fn test_aggregate_query_error_is_failure() {
        let q = query("Count", &[("ApiId", "a1")]);
        let provider = Arc::new(MockProvider::default().with_metric_failure(&q.key()));
        let agg = WindowedAggregator::new(provider);
        let value = agg.aggregate(&q, &daily_sum_window()).await;
        assert_eq!(value, MetricValue::Failed);
        assert_ne!(value, MetricValue::Value(0.0));
    }

    #[tokio::test]
    async fn test_fan_out_excludes_failed_subresource() {
        let provider = MockProvider::default()
            .with_subresources("api", &["s1", "s2", "s3"])
            .with_datapoints(&query("Count", &[("ApiId", "api"), ("Stage", "s1")]).key(), &[4.0, 6.0])
            .with_metric_failure(&query("Count", &[("ApiId", "api"), ("Stage", "s2")]).key())
            .with_datapoints(&query("Count", &[("ApiId", "api"), ("Stage", "s3")]).key(), &[5.0]);
        let provider = Arc::new(provider);
        let agg = WindowedAggregator::new(provider.clone());

        let value = agg
            .aggregate_over_subresources(
                "api",
                provider.as_ref(),
                |stage| query("Count", &[("ApiId", "api"), ("Stage", stage)]),
                &daily_sum_window(),
            )
            .await;

        assert_eq!(value, MetricValue::Value(15.0));
        assert_eq!(provider.metric_calls(), 3);
    }

    #[tokio::test]
    async fn test_fan_out_two_stages_one_failing() {
        let provider = MockProvider::default()
            .with_subresources("api", &["s1", "s2"])
            .with_datapoints(&query("Count", &[("Stage", "s1")]).key(), &[10.0])
            .with_metric_failure(&query("Count", &[("Stage", "s2")]).key());
        let provider = Arc::new(provider);
        let agg = WindowedAggregator::new(provider.clone());

        let value = agg
            .aggregate_over_subresources(
                "api",
                provider.as_ref(),
                |stage| query("Count", &[("Stage", stage)]),
                &daily_sum_window(),
            )
            .await;

        assert_eq!(value, MetricValue::Value(10.0));
    }

    #[tokio::test]
    async fn test_fan_out_discovery_failure_skips_queries() {
        let provider = Arc::new(MockProvider::default().with_discovery_failure("api"));
        let agg = WindowedAggregator::new(provider.clone());

        let value = agg
            .aggregate_over_subresources(
                "api",
                provider.as_ref(),
                |stage| query("Count", &[("Stage", stage)]),
                &daily_sum_window(),
            )
            .await;

        assert_eq!(value, MetricValue::Failed);
        assert_eq!(provider.discovery_calls(), 1);
        assert_eq!(provider.metric_calls(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_no_subresources_is_zero() {
        let provider = Arc::new(MockProvider::default().with_subresources("api", &[]));
        let agg = WindowedAggregator::new(provider.clone());

        let value = agg
            .aggregate_over_subresources(
                "api",
                provider.as_ref(),
                |stage| query("Count", &[("Stage", stage)]),
                &daily_sum_window(),
            )
            .await;

        assert_eq!(value, MetricValue::Value(0.0));
    }

    #[tokio::test]
    async fn test_fan_out_all_failing_is_failure() {
        let provider = MockProvider::default()
            .with_subresources("api", &["s1", "s2"])
            .with_metric_failure(&query("Count", &[("Stage", "s1")]).key())
            .with_metric_failure(&query("Count", &[("Stage", "s2")]).key());
        let provider = Arc::new(provider);
        let agg = WindowedAggregator::new(provider.clone());

        let value = agg
            .aggregate_over_subresources(
                "api",
                provider.as_ref(),
                |stage| query("Count", &[("Stage", stage)]),
                &daily_sum_window(),
            )
            .await;

        assert_eq!(value, MetricValue::Failed);
    }

    #[test]
    fn test_spec_builds_query_and_window() {
        fn dims(d: &ResourceDescriptor) -> Vec<Dimension> {
            vec![Dimension::new("TableName", d.name.clone())]
        }
        let spec = MetricSpec {
            column: "AvgDailyReadUnits",
            namespace: "AWS/DynamoDB",
            metric_name: "ConsumedReadCapacityUnits",
            unit: Some("Count"),
            statistic: Statistic::Sum,
            period: BucketPeriod::Daily,
            window_days: None,
            per_day: true,
            scope: MetricScope::Resource(dims),
        };
        let d = ResourceDescriptor::new(ResourceKind::Table, "arn", "orders-prod");
        let q = spec.query(dims(&d));
        assert_eq!(q.key(), "ConsumedReadCapacityUnits|TableName=orders-prod");
        let w = spec.window(now(), 14).unwrap();
        assert_eq!(w.bucket_count(), 14);
    }
}
