//! Environment classification
//!
//! Evidence is an ordered rule table; the first rule that yields a label wins:
//!
//! 1. an explicit tag (`environment`, `env`, `stage`, `deployment`, key matched
//!    case-insensitively) whose lowercased value is a known label,
//! 2. a `-`/`_` delimited segment of the name that is a known label,
//! 3. delimiter patterns for dev, staging and prod (`.dev.`, `-production-`, ...).
//!
//! These are heuristics. A name that carries an environment word as part of an
//! unrelated token can be misclassified; no disambiguation is attempted.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::collector_core::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
    Test,
    Qa,
    Uat,
    Preprod,
    Unknown,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
            Environment::Test => "test",
            Environment::Qa => "qa",
            Environment::Uat => "uat",
            Environment::Preprod => "preprod",
            Environment::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ();

    /// Only concrete labels parse; `unknown` is a result, never evidence.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            "test" => Ok(Environment::Test),
            "qa" => Ok(Environment::Qa),
            "uat" => Ok(Environment::Uat),
            "preprod" => Ok(Environment::Preprod),
            _ => Err(()),
        }
    }
}

const ENVIRONMENT_TAG_KEYS: [&str; 4] = ["environment", "env", "stage", "deployment"];

const NAME_PATTERNS: [(&[&str], Environment); 3] = [
    (&["-dev-", ".dev.", "-development"], Environment::Dev),
    (
        &["-staging-", "-stage-", ".staging.", ".stage."],
        Environment::Staging,
    ),
    (
        &["-prod-", "-production-", ".prod.", ".production."],
        Environment::Prod,
    ),
];

type Rule = fn(&str, &TagSet) -> Option<Environment>;

const RULES: [Rule; 3] = [from_tags, from_name_segments, from_name_patterns];

pub fn classify(resource_name: &str, tags: &TagSet) -> Environment {
    RULES
        .iter()
        .find_map(|rule| rule(resource_name, tags))
        .unwrap_or(Environment::Unknown)
}

fn from_tags(_name: &str, tags: &TagSet) -> Option<Environment> {
    ENVIRONMENT_TAG_KEYS.iter().find_map(|wanted| {
        tags.iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .find_map(|(_, value)| value.trim().to_lowercase().parse().ok())
    })
}

fn from_name_segments(name: &str, _tags: &TagSet) -> Option<Environment> {
    name.to_lowercase()
        .split(['-', '_'])
        .find_map(|segment| segment.parse().ok())
}

fn from_name_patterns(name: &str, _tags: &TagSet) -> Option<Environment> {
    let lower = name.to_lowercase();
    NAME_PATTERNS
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(_, env)| *env)
}
