//! OperationOutcome construction helpers.

use serde_json::{json, Value as JsonValue};

/// One issue to render into an OperationOutcome.
#[derive(Debug, Clone)]
pub struct OutcomeIssue {
    pub severity: &'static str,
    pub code: &'static str,
    pub diagnostics: String,
    /// FHIRPath-ish location of the problem, e.g. `Observation.status`.
    pub expression: Option<String>,
}

impl OutcomeIssue {
    pub fn error(code: &'static str, diagnostics: impl Into<String>) -> Self {
        Self {
            severity: "error",
            code,
            diagnostics: diagnostics.into(),
            expression: None,
        }
    }

    pub fn warning(code: &'static str, diagnostics: impl Into<String>) -> Self {
        Self {
            severity: "warning",
            code,
            diagnostics: diagnostics.into(),
            expression: None,
        }
    }

    pub fn at(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    fn to_json(&self) -> JsonValue {
        let mut issue = json!({
            "severity": self.severity,
            "code": self.code,
            "diagnostics": self.diagnostics,
        });
        if let Some(expr) = &self.expression {
            issue["expression"] = json!([expr]);
        }
        issue
    }
}

/// Build an OperationOutcome from a list of issues.
pub fn outcome_error(issues: &[OutcomeIssue]) -> JsonValue {
    json!({
        "resourceType": "OperationOutcome",
        "issue": issues.iter().map(OutcomeIssue::to_json).collect::<Vec<_>>(),
    })
}

/// An informational OperationOutcome with a single diagnostics string.
pub fn outcome_info(diagnostics: impl Into<String>) -> JsonValue {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "information",
            "code": "informational",
            "diagnostics": diagnostics.into(),
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_carry_expression() {
        let outcome = outcome_error(&[
            OutcomeIssue::error("required", "Observation.status is missing")
                .at("Observation.status"),
            OutcomeIssue::warning("informational", "unknown parameter ignored"),
        ]);
        assert_eq!(outcome["issue"][0]["expression"][0], "Observation.status");
        assert_eq!(outcome["issue"][1]["severity"], "warning");
    }
}
