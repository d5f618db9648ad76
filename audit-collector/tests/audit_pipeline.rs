use std::sync::Arc;

use audit_collector::audit::{AuditReport, Auditor};
use audit_collector::collector_core::{Collector, Discovered, ResourceDescriptor, ResourceKind, StaticFields};
use audit_collector::collectors::{apigateway, s3, sqs};
use audit_collector::engine::{EngineSettings, ReportRow, RowStatus, FAILURE_SENTINEL};
use audit_collector::error::AuditError;
use audit_collector::mock::{MockCollector, MockProvider};
use audit_collector::out::csv::write_reports;
use chrono::{TimeZone, Utc};
use serde_json::json;

const QUEUE_URL: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/orders-prod";
const API_ARN: &str = "arn:aws:apigateway:us-east-1::/restapis/abc123";

fn settings() -> EngineSettings {
    EngineSettings {
        now: Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap(),
        window_days: 30,
        stack_tag_keys: vec!["aws:cloudformation:stack-name".to_string()],
    }
}

fn provider() -> Arc<MockProvider> {
    Arc::new(
        MockProvider::default()
            .with_tags(QUEUE_URL, &[("aws:cloudformation:stack-name", "orders-stack")])
            .with_datapoints("NumberOfMessagesReceived|QueueName=orders-prod", &[10.0, 5.0])
            .with_tag_failure("media-staging")
            .with_metric_failure("BucketSizeBytes|BucketName=media-staging,StorageType=StandardStorage")
            .with_physical(API_ARN, "gateway-stack")
            .with_subresources(API_ARN, &["s1", "s2"])
            .with_datapoints("Count|ApiName=public-api,Stage=s1", &[4.0, 6.0])
            .with_metric_failure("Count|ApiName=public-api,Stage=s2"),
    )
}

fn collectors(provider: &Arc<MockProvider>) -> Vec<Arc<dyn Collector>> {
    let queue = MockCollector::new("sqs", ResourceKind::Queue, sqs::METRICS, provider.clone()).with_item(
        Discovered::new(
            ResourceDescriptor::new(ResourceKind::Queue, QUEUE_URL, "orders-prod").with_alternate("orders-prod"),
            StaticFields::new(),
        ),
    );

    let buckets = MockCollector::new("s3", ResourceKind::Bucket, s3::METRICS, provider.clone())
        .with_item(Discovered::new(
            ResourceDescriptor::new(ResourceKind::Bucket, "media-staging", "media-staging"),
            StaticFields::new(),
        ))
        .with_item(Discovered::failed(
            ResourceDescriptor::new(ResourceKind::Bucket, "locked-bucket", "locked-bucket"),
            "Access denied: GetBucketLocation",
        ));

    let apis = MockCollector::new("apigateway", ResourceKind::GatewayApi, apigateway::METRICS, provider.clone())
        .with_item(Discovered::new(
            ResourceDescriptor::new(ResourceKind::GatewayApi, API_ARN, "public-api").with_alternate("abc123"),
            StaticFields::new(),
        ));

    let topics = MockCollector::new("sns", ResourceKind::Topic, &[], provider.clone()).failing();

    vec![Arc::new(queue), Arc::new(buckets), Arc::new(apis), Arc::new(topics)]
}

fn find<'a>(report: &'a AuditReport, name: &str) -> &'a ReportRow {
    report
        .rows
        .iter()
        .find(|r| r.text("Name") == name)
        .unwrap_or_else(|| panic!("no row named {name}"))
}

#[tokio::test]
async fn test_pipeline_isolates_failures() {
    let provider = provider();
    let report = Auditor::new(collectors(&provider), settings(), 4).run().await.unwrap();

    assert_eq!(report.rows.len(), 4);
    assert_eq!(report.failed_listings(), vec!["sns"]);
    assert_eq!(report.error_count(), 1);
    assert_eq!(report.partial_count(), 1);

    let queue = find(&report, "orders-prod");
    assert_eq!(queue.status(), RowStatus::Complete);
    assert_eq!(queue.text("StackName"), "orders-stack");
    assert_eq!(queue.text("Attribution"), "tag");
    assert_eq!(queue.text("Environment"), "prod");
    assert_eq!(queue.get("MessagesReceived"), Some(&json!(15)));

    let media = find(&report, "media-staging");
    assert_eq!(media.status(), RowStatus::Partial);
    assert_eq!(media.get("BucketSizeBytes"), Some(&json!(FAILURE_SENTINEL)));
    assert_eq!(media.get("NumberOfObjects"), Some(&json!(0)));
    assert_eq!(media.text("Tags"), "Error retrieving tags");
    assert_eq!(media.text("Environment"), "staging");

    let locked = find(&report, "locked-bucket");
    assert_eq!(locked.status(), RowStatus::Error);
    assert_eq!(locked.text("StackName"), "Error");
    for spec in s3::METRICS {
        assert_eq!(locked.get(spec.column), Some(&json!(FAILURE_SENTINEL)));
    }

    // s2 fails, s1 still counts
    let api = find(&report, "public-api");
    assert_eq!(api.status(), RowStatus::Complete);
    assert_eq!(api.get("TotalRequests"), Some(&json!(10)));
    assert_eq!(api.text("StackName"), "gateway-stack");
    assert_eq!(api.text("Attribution"), "physical-id");
}

#[tokio::test]
async fn test_tag_hit_skips_registry() {
    let provider = Arc::new(
        MockProvider::default().with_tags(QUEUE_URL, &[("aws:cloudformation:stack-name", "orders-stack")]),
    );
    let queue: Arc<dyn Collector> = Arc::new(
        MockCollector::new("sqs", ResourceKind::Queue, sqs::METRICS, provider.clone()).with_item(Discovered::new(
            ResourceDescriptor::new(ResourceKind::Queue, QUEUE_URL, "orders-prod"),
            StaticFields::new(),
        )),
    );

    let report = Auditor::new(vec![queue], settings(), 1).run().await.unwrap();
    assert_eq!(report.rows[0].text("StackName"), "orders-stack");
    assert_eq!(provider.tag_calls(), 1);
    assert_eq!(provider.physical_calls(), 0);
    assert_eq!(provider.stack_calls(), 0);
}

#[tokio::test]
async fn test_all_listings_failed_is_fatal() {
    let provider = provider();
    let collectors: Vec<Arc<dyn Collector>> = vec![
        Arc::new(MockCollector::new("s3", ResourceKind::Bucket, s3::METRICS, provider.clone()).failing()),
        Arc::new(MockCollector::new("sqs", ResourceKind::Queue, sqs::METRICS, provider.clone()).failing()),
    ];

    let err = Auditor::new(collectors, settings(), 2).run().await.unwrap_err();
    match err {
        AuditError::InventoryUnavailable(names) => {
            assert!(names.contains("s3"));
            assert!(names.contains("sqs"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_report_exports_to_csv() {
    let provider = provider();
    let report = Auditor::new(collectors(&provider), settings(), 4).run().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let files = write_reports(dir.path(), &report.rows).unwrap();
    assert_eq!(files.len(), 3);

    let buckets = std::fs::read_to_string(dir.path().join("bucket_audit.csv")).unwrap();
    let mut lines = buckets.lines();
    assert!(lines.next().unwrap().starts_with("Bucket Name,Region,Environment,Stack Name"));
    assert_eq!(lines.count(), 2);
    assert!(buckets.contains("locked-bucket"));
    assert!(buckets.contains(",error"));
}
