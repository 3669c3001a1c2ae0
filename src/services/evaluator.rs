//! Answer quality evaluators.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{LanguageModel, QualityEvaluator, QualityReport};
use crate::error::HlcsResult;

/// Length, coherence and criteria heuristic.
///
/// Starts at 0.5; answers under 50 chars lose 0.2, over 5000 lose 0.1,
/// otherwise gain 0.1; more than two sentences gain 0.1; the fraction of
/// criteria mentioned adds up to 0.3. Empty answers score 0.
#[derive(Debug, Clone, Default)]
pub struct HeuristicEvaluator {
    criteria: Vec<String>,
}

impl HeuristicEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Words the answer is expected to mention.
    pub fn with_criteria<I, S>(criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            criteria: criteria.into_iter().map(Into::into).collect(),
        }
    }

    pub fn assess(&self, answer: &str) -> QualityReport {
        let mut score: f32 = 0.5;
        let mut issues = Vec::new();
        let length = answer.chars().count();

        if length < 50 {
            issues.push("Response too short".to_string());
            score -= 0.2;
        } else if length > 5000 {
            issues.push("Response may be too verbose".to_string());
            score -= 0.1;
        } else {
            score += 0.1;
        }

        if answer.trim().is_empty() {
            issues.push("Empty response".to_string());
            return QualityReport { score: 0.0, issues };
        }
        if answer.split('.').count() > 2 {
            score += 0.1;
        }

        if !self.criteria.is_empty() {
            let lower = answer.to_lowercase();
            let met = self
                .criteria
                .iter()
                .filter(|c| lower.contains(&c.to_lowercase()))
                .count();
            let ratio = met as f32 / self.criteria.len() as f32;
            score += 0.3 * ratio;
            if ratio < 0.5 {
                issues.push(format!("Only {}/{} criteria met", met, self.criteria.len()));
            }
        }

        QualityReport {
            score: score.clamp(0.0, 1.0),
            issues,
        }
    }
}

#[async_trait]
impl QualityEvaluator for HeuristicEvaluator {
    async fn evaluate(&self, answer: &str, _query: &str) -> HlcsResult<QualityReport> {
        Ok(self.assess(answer))
    }

    fn name(&self) -> &str {
        "heuristic_evaluator"
    }
}

/// Asks a language model to grade the answer.
///
/// The model is asked for `{"score": .., "issues": [..]}`; output that
/// does not contain such an object grades as 0.7 with no issues.
pub struct LlmJudgeEvaluator {
    llm: Arc<dyn LanguageModel>,
}

const FALLBACK_SCORE: f32 = 0.7;

impl LlmJudgeEvaluator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    fn prompt(answer: &str, query: &str) -> String {
        format!(
            "Rate this answer from 0.0 to 1.0.\n\nQuery: {query}\nAnswer: {answer}\n\n\
             Reply with JSON only: {{\"score\": 0.85, \"issues\": [\"issue\"]}}\n"
        )
    }

    fn parse(raw: &str) -> QualityReport {
        #[derive(Deserialize)]
        struct Verdict {
            score: f32,
            #[serde(default)]
            issues: Vec<String>,
        }

        let parsed = match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<Verdict>(&raw[start..=end]).ok()
            }
            _ => None,
        };

        match parsed {
            Some(v) if v.score.is_finite() => QualityReport {
                score: v.score.clamp(0.0, 1.0),
                issues: v.issues,
            },
            _ => {
                debug!("Judge output not parseable, using fallback score");
                QualityReport {
                    score: FALLBACK_SCORE,
                    issues: Vec::new(),
                }
            }
        }
    }
}

#[async_trait]
impl QualityEvaluator for LlmJudgeEvaluator {
    async fn evaluate(&self, answer: &str, query: &str) -> HlcsResult<QualityReport> {
        let raw = self.llm.generate(&Self::prompt(answer, query)).await?;
        Ok(Self::parse(&raw))
    }

    fn name(&self) -> &str {
        "llm_judge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_answer_flagged() {
        let report = HeuristicEvaluator::new().assess("Hi.");
        assert!((report.score - 0.3).abs() < 1e-6);
        assert_eq!(report.issues, vec!["Response too short"]);
    }

    #[test]
    fn test_good_answer() {
        let answer = "Black holes form when massive stars collapse. \
                      Their gravity traps light. They grow by accretion.";
        let report = HeuristicEvaluator::new().assess(answer);
        assert!((report.score - 0.7).abs() < 1e-6);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_empty_answer_scores_zero() {
        let report = HeuristicEvaluator::new().assess("   ");
        assert_eq!(report.score, 0.0);
        assert!(report.issues.contains(&"Empty response".to_string()));
    }

    #[test]
    fn test_criteria_ratio() {
        let eval = HeuristicEvaluator::with_criteria(["gravity", "light", "entropy", "spin"]);
        let report = eval.assess("Gravity bends light. That is the short version of it all.");
        // 0.5 + 0.1 (length) + 0.1 (sentences) + 0.3 * 0.5
        assert!((report.score - 0.85).abs() < 1e-6);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_judge_parsing() {
        let r = LlmJudgeEvaluator::parse("Sure! {\"score\": 0.42, \"issues\": [\"vague\"]} hope it helps");
        assert!((r.score - 0.42).abs() < 1e-6);
        assert_eq!(r.issues, vec!["vague"]);

        let r = LlmJudgeEvaluator::parse("I think it's great");
        assert_eq!(r.score, FALLBACK_SCORE);

        let r = LlmJudgeEvaluator::parse("{\"score\": 7}");
        assert_eq!(r.score, 1.0);
    }
}
