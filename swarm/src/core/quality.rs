//! Before/after comparison of analysis results.
//!
//! Informational only: the repair loop logs the comparison but termination is
//! decided by test outcomes.

use serde::Serialize;

use crate::core::types::AnalysisResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityComparison {
    pub score_before: f64,
    pub score_after: f64,
    pub score_delta: f64,
    pub improved: bool,
    pub issues_before: usize,
    pub issues_after: usize,
    /// Negative when the candidate has fewer issues.
    pub issue_delta: i64,
}

pub fn compare(before: &AnalysisResult, after: &AnalysisResult) -> QualityComparison {
    let issues_before = before.issues.len();
    let issues_after = after.issues.len();
    QualityComparison {
        score_before: before.score,
        score_after: after.score,
        score_delta: after.score - before.score,
        improved: after.is_improved(before),
        issues_before,
        issues_after,
        issue_delta: issues_after as i64 - issues_before as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Issue, IssueCategory, Metadata};

    fn analysis(score: f64, issues: usize) -> AnalysisResult {
        AnalysisResult {
            success: true,
            score,
            issues: (0..issues)
                .map(|i| Issue::new(IssueCategory::Convention, i as u32, 0, "m", "s", None))
                .collect(),
            error: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn reports_improvement() {
        let cmp = compare(&analysis(5.0, 4), &analysis(7.5, 1));
        assert!(cmp.improved);
        assert_eq!(cmp.score_delta, 2.5);
        assert_eq!(cmp.issue_delta, -3);
    }

    #[test]
    fn equal_scores_are_not_an_improvement() {
        let cmp = compare(&analysis(6.0, 2), &analysis(6.0, 3));
        assert!(!cmp.improved);
        assert_eq!(cmp.score_delta, 0.0);
        assert_eq!(cmp.issue_delta, 1);
    }

    #[test]
    fn failed_analysis_compares_as_zero_score() {
        let cmp = compare(&AnalysisResult::failed("timeout"), &analysis(4.0, 0));
        assert!(cmp.improved);
        assert_eq!(cmp.score_before, 0.0);
    }
}
