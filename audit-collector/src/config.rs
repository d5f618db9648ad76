use std::path::PathBuf;

use clap::Parser;

use crate::collectors::ServiceKind;
use crate::engine::attribution::DEFAULT_STACK_TAG_KEYS;
use crate::engine::metrics::MAX_WINDOW_DAYS;
use crate::error::AuditError;
use crate::out::OutMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "audit-collector")]
#[command(about = "Audit an AWS account's resources: provenance, environment and usage metrics")]
pub struct Cli {
    /// Services to audit, comma separated (apigateway,dynamodb,lambda,s3,sns,sqs,stepfunctions) or `all`
    #[arg(long, env = "AUDIT_SERVICES", default_value = "all")]
    pub services: String,

    /// Region override; otherwise the SDK default chain decides
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Trailing metric window in days
    #[arg(long, env = "AUDIT_WINDOW_DAYS", default_value_t = 30)]
    pub window_days: u32,

    /// Rows built concurrently per service
    #[arg(long, env = "AUDIT_CONCURRENCY", default_value_t = 8)]
    pub concurrency: usize,

    /// stdout | csv | http
    #[arg(long, env = "AUDIT_OUT", default_value = "stdout")]
    pub out: String,

    #[arg(long, env = "AUDIT_OUT_DIR", default_value = "audit-reports")]
    pub out_dir: PathBuf,

    /// Receiver for `--out http`
    #[arg(long, env = "AUDIT_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "AUDIT_BATCH_SIZE", default_value_t = 200)]
    pub batch_size: usize,

    #[arg(long, env = "AUDIT_BATCH_FLUSH_MS", default_value_t = 300)]
    pub batch_flush_ms: u64,

    /// Tag key naming the owning stack (can be specified multiple times)
    #[arg(long = "stack-tag-key", env = "AUDIT_STACK_TAG_KEYS", value_delimiter = ',')]
    pub stack_tag_keys: Vec<String>,

    /// Run against built-in fixtures instead of AWS
    #[arg(long, env = "AUDIT_MOCK")]
    pub mock: bool,
}

#[derive(Debug, Clone)]
pub enum OutputTarget {
    Stdout,
    Csv { dir: PathBuf },
    Http {
        endpoint: String,
        batch_size: usize,
        batch_flush_ms: u64,
    },
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub services: Vec<ServiceKind>,
    pub region: Option<String>,
    pub window_days: u32,
    pub concurrency: usize,
    pub stack_tag_keys: Vec<String>,
    pub output: OutputTarget,
    pub mock: bool,
}

impl TryFrom<Cli> for AuditConfig {
    type Error = AuditError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let services = ServiceKind::parse_list(&cli.services)?;

        let output = match OutMode::parse(&cli.out)? {
            OutMode::Stdout => OutputTarget::Stdout,
            OutMode::Csv => OutputTarget::Csv { dir: cli.out_dir },
            OutMode::Http => OutputTarget::Http {
                endpoint: cli
                    .endpoint
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| AuditError::InvalidConfig("--out http requires --endpoint".into()))?,
                batch_size: cli.batch_size,
                batch_flush_ms: cli.batch_flush_ms,
            },
        };

        let mut stack_tag_keys: Vec<String> = cli
            .stack_tag_keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if stack_tag_keys.is_empty() {
            stack_tag_keys = DEFAULT_STACK_TAG_KEYS.iter().map(|k| k.to_string()).collect();
        }

        let config = AuditConfig {
            services,
            region: cli.region.filter(|r| !r.trim().is_empty()),
            window_days: cli.window_days,
            concurrency: cli.concurrency,
            stack_tag_keys,
            output,
            mock: cli.mock,
        };
        config.validate()?;
        Ok(config)
    }
}

impl AuditConfig {
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.window_days == 0 {
            return Err(AuditError::InvalidConfig("window days must be > 0".into()));
        }
        if self.window_days > MAX_WINDOW_DAYS {
            return Err(AuditError::InvalidConfig(format!(
                "window days must be <= {} (CloudWatch retention)",
                MAX_WINDOW_DAYS
            )));
        }
        if self.concurrency == 0 {
            return Err(AuditError::InvalidConfig("concurrency must be > 0".into()));
        }
        if let OutputTarget::Http { batch_size, .. } = &self.output {
            if *batch_size == 0 {
                return Err(AuditError::InvalidConfig("batch size must be > 0".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<AuditConfig, AuditError> {
        let mut argv = vec!["audit-collector"];
        argv.extend_from_slice(args);
        AuditConfig::try_from(Cli::parse_from(argv))
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(&["--services", "all"]).unwrap();
        assert_eq!(cfg.services, ServiceKind::ALL.to_vec());
        assert_eq!(cfg.window_days, 30);
        assert_eq!(cfg.concurrency, 8);
        assert!(matches!(cfg.output, OutputTarget::Stdout));
        assert_eq!(cfg.stack_tag_keys.len(), DEFAULT_STACK_TAG_KEYS.len());
        assert_eq!(cfg.stack_tag_keys[0], "aws:cloudformation:stack-name");
        assert!(cfg.stack_tag_keys.iter().any(|k| k == "deployment-stack-name"));
    }

    #[test]
    fn test_stack_tag_keys_repeatable() {
        let cfg = parse(&[
            "--services",
            "sqs",
            "--stack-tag-key",
            "stack",
            "--stack-tag-key",
            "owner-stack",
        ])
        .unwrap();
        assert_eq!(cfg.stack_tag_keys, vec!["stack".to_string(), "owner-stack".to_string()]);
    }

    #[test]
    fn test_http_requires_endpoint() {
        let err = parse(&["--services", "s3", "--out", "http"]).unwrap_err();
        assert!(err.to_string().contains("--endpoint"));

        let cfg = parse(&[
            "--services",
            "s3",
            "--out",
            "http",
            "--endpoint",
            "http://localhost:8080/api/audit:bulk",
            "--batch-size",
            "50",
        ])
        .unwrap();
        match cfg.output {
            OutputTarget::Http { endpoint, batch_size, .. } => {
                assert_eq!(endpoint, "http://localhost:8080/api/audit:bulk");
                assert_eq!(batch_size, 50);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_rejects_zero_window_and_concurrency() {
        assert!(parse(&["--services", "s3", "--window-days", "0"]).is_err());
        assert!(parse(&["--services", "s3", "--concurrency", "0"]).is_err());
    }

    #[test]
    fn test_window_bounded_by_retention() {
        let cfg = parse(&["--services", "s3", "--window-days", "455"]).unwrap();
        assert_eq!(cfg.window_days, MAX_WINDOW_DAYS);

        let err = parse(&["--services", "s3", "--window-days", "456"]).unwrap_err();
        assert!(err.to_string().contains("455"));
        assert!(parse(&["--services", "s3", "--window-days", "200000000"]).is_err());
    }

    #[test]
    fn test_csv_dir() {
        let cfg = parse(&["--services", "sqs,sns", "--out", "csv", "--out-dir", "/tmp/reports"]).unwrap();
        assert_eq!(cfg.services, vec![ServiceKind::Sqs, ServiceKind::Sns]);
        match cfg.output {
            OutputTarget::Csv { dir } => assert_eq!(dir, PathBuf::from("/tmp/reports")),
            other => panic!("unexpected output {other:?}"),
        }
    }
}
