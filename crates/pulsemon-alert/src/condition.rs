//! Condition expression trees, parsed from stored rule configuration.
//!
//! A condition is a closed tagged union; the evaluator pattern-matches
//! exhaustively so adding a variant is a compile-time checklist rather
//! than a runtime surprise.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{EvalError, Result};

/// Comparison operator for threshold conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" => Ok(Self::Gt),
            "greater_equal" | "gte" => Ok(Self::Gte),
            "less_than" | "lt" => Ok(Self::Lt),
            "less_equal" | "lte" => Ok(Self::Lte),
            "equal" | "eq" => Ok(Self::Eq),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, "gt"),
            Self::Gte => write!(f, "gte"),
            Self::Lt => write!(f, "lt"),
            Self::Lte => write!(f, "lte"),
            Self::Eq => write!(f, "eq"),
        }
    }
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }

    fn phrase(&self) -> &'static str {
        match self {
            Self::Gt => "above",
            Self::Gte => "at or above",
            Self::Lt => "below",
            Self::Lte => "at or below",
            Self::Eq => "equal to",
        }
    }
}

/// Boolean connective for composite conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    And,
    Or,
}

/// A rule's condition tree.
///
/// Serialized as JSON with a `type` tag, e.g.:
///
/// ```json
/// {"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": 7.0}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionExpr {
    /// Compare the observed value for `metric_key` against `threshold`.
    /// When the triggering observation is for a different metric, the
    /// most recent value within `evaluation_window_secs` is used instead.
    Threshold {
        metric_key: String,
        operator: CompareOp,
        threshold: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evaluation_window_secs: Option<i64>,
    },
    /// Boolean combination of sub-conditions, evaluated left to right
    /// with short-circuiting.
    Composite {
        operator: BoolOp,
        conditions: Vec<ConditionExpr>,
    },
    /// True when the patient has no observation within the expected
    /// assessment cadence window.
    MissedAssessment {},
    /// The inner condition must hold on every one of the trailing
    /// `required_consecutive_days` calendar days.
    ConsecutivePattern {
        inner: Box<ConditionExpr>,
        required_consecutive_days: u32,
    },
}

impl ConditionExpr {
    /// Structural validation: non-empty composites, positive day counts,
    /// nesting bounded by `max_depth`.
    pub fn validate(&self, max_depth: usize) -> Result<()> {
        self.validate_at(0, max_depth)
    }

    fn validate_at(&self, depth: usize, max_depth: usize) -> Result<()> {
        if depth >= max_depth {
            return Err(EvalError::ExpressionTooDeep { max: max_depth });
        }
        match self {
            ConditionExpr::Threshold { metric_key, .. } => {
                if metric_key.is_empty() {
                    return Err(EvalError::InvalidRule {
                        reason: "threshold condition has empty metric_key".to_string(),
                    });
                }
                Ok(())
            }
            ConditionExpr::Composite { conditions, .. } => {
                if conditions.is_empty() {
                    return Err(EvalError::InvalidRule {
                        reason: "composite condition has no sub-conditions".to_string(),
                    });
                }
                for cond in conditions {
                    cond.validate_at(depth + 1, max_depth)?;
                }
                Ok(())
            }
            ConditionExpr::MissedAssessment {} => Ok(()),
            ConditionExpr::ConsecutivePattern {
                inner,
                required_consecutive_days,
            } => {
                if *required_consecutive_days < 1 {
                    return Err(EvalError::InvalidRule {
                        reason: "consecutive pattern requires at least 1 day".to_string(),
                    });
                }
                inner.validate_at(depth + 1, max_depth)
            }
        }
    }

    /// Human-readable rendering, used in alert messages and the
    /// `matched_condition` field.
    pub fn describe(&self) -> String {
        match self {
            ConditionExpr::Threshold {
                metric_key,
                operator,
                threshold,
                ..
            } => format!("{metric_key} {} {threshold:.1}", operator.phrase()),
            ConditionExpr::Composite {
                operator,
                conditions,
            } => {
                let joiner = match operator {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                };
                let parts: Vec<String> = conditions.iter().map(|c| c.describe()).collect();
                format!("({})", parts.join(joiner))
            }
            ConditionExpr::MissedAssessment {} => "missed assessment".to_string(),
            ConditionExpr::ConsecutivePattern {
                inner,
                required_consecutive_days,
            } => format!(
                "{} on {required_consecutive_days} consecutive days",
                inner.describe()
            ),
        }
    }
}
