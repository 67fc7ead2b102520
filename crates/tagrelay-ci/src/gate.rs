//! Pass/fail decision over executed build phases.

use crate::runner::StageResult;
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Decides whether a build may publish its tag.
pub struct CiGate;

impl CiGate {
    /// Evaluate executed phases.
    ///
    /// Gate rule:
    /// - At least one phase must have run
    /// - Every phase must have exited 0
    pub fn evaluate(results: &[StageResult]) -> GateVerdict {
        let mut violations = Vec::new();

        if results.is_empty() {
            violations.push("No phases were executed".to_string());
        }

        for result in results.iter().filter(|r| !r.passed()) {
            let detail = result.stderr.trim().lines().last().unwrap_or("").to_string();
            if detail.is_empty() {
                violations.push(format!(
                    "Phase '{}' exited with code {}",
                    result.stage_name, result.exit_code
                ));
            } else {
                violations.push(format!(
                    "Phase '{}' exited with code {}: {}",
                    result.stage_name, result.exit_code, detail
                ));
            }
        }

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} phase(s) passed", results.len())
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
