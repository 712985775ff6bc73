//! Declarative detection rules.

use microcloud_core::types::IncidentSeverity;
use serde::{Deserialize, Serialize};

/// Comparison operator between a sample and a rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

/// A sliding-window detection rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub metric_name: String,
    pub operator: Operator,
    pub threshold: f64,
    pub window_seconds: u64,
    pub severity: IncidentSeverity,
}

impl Rule {
    fn new(
        name: &str,
        metric_name: &str,
        operator: Operator,
        threshold: f64,
        window_seconds: u64,
        severity: IncidentSeverity,
    ) -> Self {
        Self {
            name: name.to_string(),
            metric_name: metric_name.to_string(),
            operator,
            threshold,
            window_seconds,
            severity,
        }
    }

    /// True when a sample breaches this rule's threshold
    pub fn evaluate(&self, value: f64) -> bool {
        match self.operator {
            Operator::Gt => value > self.threshold,
            Operator::Gte => value >= self.threshold,
            Operator::Lt => value < self.threshold,
            Operator::Lte => value <= self.threshold,
            Operator::Eq => value == self.threshold,
        }
    }
}

/// The default rule set
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "high_error_rate",
            "error_rate_percent",
            Operator::Gt,
            5.0,
            30,
            IncidentSeverity::Warning,
        ),
        Rule::new(
            "critical_error_rate",
            "error_rate_percent",
            Operator::Gt,
            10.0,
            15,
            IncidentSeverity::Critical,
        ),
        Rule::new(
            "high_cpu_usage",
            "cpu_usage_percent",
            Operator::Gt,
            85.0,
            60,
            IncidentSeverity::Warning,
        ),
        Rule::new(
            "critical_cpu_usage",
            "cpu_usage_percent",
            Operator::Gt,
            95.0,
            30,
            IncidentSeverity::Critical,
        ),
        Rule::new(
            "high_memory_usage",
            "memory_usage_percent",
            Operator::Gt,
            90.0,
            60,
            IncidentSeverity::Warning,
        ),
        Rule::new(
            "high_latency",
            "latency_p99_ms",
            Operator::Gt,
            500.0,
            30,
            IncidentSeverity::Warning,
        ),
    ]
}
