use async_trait::async_trait;
use aws_sdk_cloudwatch as cw;
use cw::primitives::DateTime;
use cw::types::{Datapoint, StandardUnit, Statistic as CwStatistic};

use super::{access_error, AwsContext};
use crate::collector_core::MetricSource;
use crate::engine::metrics::{MetricQuery, MetricWindow, Statistic};
use crate::error::AccessError;

pub struct CloudWatchMetrics {
    client: cw::Client,
}

impl CloudWatchMetrics {
    pub fn new(ctx: &AwsContext) -> Self {
        Self {
            client: cw::Client::new(ctx.config()),
        }
    }
}

fn cw_statistic(s: Statistic) -> CwStatistic {
    match s {
        Statistic::Sum => CwStatistic::Sum,
        Statistic::Average => CwStatistic::Average,
        Statistic::Max => CwStatistic::Maximum,
    }
}

fn datapoint_value(dp: &Datapoint, s: Statistic) -> Option<f64> {
    match s {
        Statistic::Sum => dp.sum(),
        Statistic::Average => dp.average(),
        Statistic::Max => dp.maximum(),
    }
}

#[async_trait]
impl MetricSource for CloudWatchMetrics {
    async fn datapoints(&self, query: &MetricQuery, window: &MetricWindow) -> Result<Vec<f64>, AccessError> {
        let dimensions: Vec<cw::types::Dimension> = query
            .dimensions
            .iter()
            .map(|d| cw::types::Dimension::builder().name(&d.name).value(&d.value).build())
            .collect();

        let mut req = self
            .client
            .get_metric_statistics()
            .namespace(&query.namespace)
            .metric_name(&query.metric_name)
            .set_dimensions(Some(dimensions))
            .start_time(DateTime::from_secs(window.start().timestamp()))
            .end_time(DateTime::from_secs(window.end().timestamp()))
            .period(window.period().num_seconds() as i32)
            .statistics(cw_statistic(window.statistic()));
        if let Some(unit) = &query.unit {
            req = req.unit(StandardUnit::from(unit.as_str()));
        }

        let out = req.send().await.map_err(access_error)?;
        Ok(out
            .datapoints()
            .iter()
            .filter_map(|dp| datapoint_value(dp, window.statistic()))
            .collect())
    }
}
