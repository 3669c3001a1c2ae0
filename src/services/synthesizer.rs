//! Prompt assembly around a [`LanguageModel`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::LanguageModel;
use crate::error::{HlcsError, HlcsResult};

/// Max research snippets placed in a synthesis prompt.
pub const MAX_SNIPPETS: usize = 5;
/// Snippets are cut to this many characters.
pub const SNIPPET_CHARS: usize = 200;

/// One answer proposed by an ensemble branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source: String,
    pub answer: String,
    pub confidence: f32,
}

/// Builds synthesis, refinement and merge prompts and runs them through
/// the language model.
pub struct RetrievalSynthesizer {
    llm: Arc<dyn LanguageModel>,
}

impl RetrievalSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub fn model_name(&self) -> &str {
        self.llm.name()
    }

    pub fn synthesis_prompt(query: &str, research: &[String], context: Option<&JsonValue>) -> String {
        let mut prompt = format!("Query: {query}\n\n");

        if !research.is_empty() {
            prompt.push_str("Information:\n");
            for snippet in research.iter().take(MAX_SNIPPETS) {
                let cut: String = snippet.chars().take(SNIPPET_CHARS).collect();
                prompt.push_str("- ");
                prompt.push_str(&cut);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        if let Some(ctx) = context.filter(|c| !c.is_null()) {
            prompt.push_str(&format!("Context: {ctx}\n\n"));
        }

        prompt.push_str("Generate a complete and precise answer.");
        prompt
    }

    pub fn refinement_prompt(answer: &str, query: &str, issues: &[String]) -> String {
        let issues = if issues.is_empty() {
            "none reported".to_string()
        } else {
            issues.join(", ")
        };
        format!(
            "Improve this answer.\n\nQuery: {query}\nCurrent answer: {answer}\n\
             Issues: {issues}\n\nReturn only the improved answer."
        )
    }

    pub fn merge_prompt(candidates: &[Candidate], query: &str) -> String {
        let mut prompt = format!("Query: {query}\n\nCandidate answers:\n");
        for (i, c) in candidates.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{} @ {:.2}] {}\n",
                i + 1,
                c.source,
                c.confidence,
                c.answer
            ));
        }
        prompt.push_str("\nCombine the strongest points into one coherent answer.");
        prompt
    }

    pub async fn synthesize(
        &self,
        query: &str,
        research: &[String],
        context: Option<&JsonValue>,
    ) -> HlcsResult<String> {
        self.complete(&Self::synthesis_prompt(query, research, context)).await
    }

    pub async fn refine(&self, answer: &str, query: &str, issues: &[String]) -> HlcsResult<String> {
        self.complete(&Self::refinement_prompt(answer, query, issues)).await
    }

    pub async fn merge(&self, candidates: &[Candidate], query: &str) -> HlcsResult<String> {
        if candidates.is_empty() {
            return Err(HlcsError::invalid("no candidates to merge"));
        }
        self.complete(&Self::merge_prompt(candidates, query)).await
    }

    async fn complete(&self, prompt: &str) -> HlcsResult<String> {
        let text = self.llm.generate(prompt).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HlcsError::upstream(self.llm.name(), "empty completion"));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        async fn generate(&self, prompt: &str) -> HlcsResult<String> {
            Ok(format!("  {}  ", prompt.len()))
        }
    }

    struct Silent;

    #[async_trait]
    impl LanguageModel for Silent {
        async fn generate(&self, _prompt: &str) -> HlcsResult<String> {
            Ok("   ".into())
        }
    }

    #[test]
    fn test_prompt_limits_snippets() {
        let research: Vec<String> = (0..8).map(|i| format!("{i}{}", "x".repeat(300))).collect();
        let prompt = RetrievalSynthesizer::synthesis_prompt("q", &research, None);
        assert_eq!(prompt.matches("\n- ").count(), MAX_SNIPPETS);
        assert!(!prompt.contains(&"x".repeat(SNIPPET_CHARS)));
        assert!(prompt.ends_with("Generate a complete and precise answer."));
    }

    #[test]
    fn test_prompt_without_research() {
        let prompt = RetrievalSynthesizer::synthesis_prompt(
            "what",
            &[],
            Some(&serde_json::json!({"lang": "es"})),
        );
        assert!(!prompt.contains("Information:"));
        assert!(prompt.contains("Context: {\"lang\":\"es\"}"));
    }

    #[tokio::test]
    async fn test_output_trimmed() {
        let synth = RetrievalSynthesizer::new(Arc::new(Echo));
        let out = synth.synthesize("q", &[], None).await.unwrap();
        assert_eq!(out, out.trim());
    }

    #[tokio::test]
    async fn test_empty_completion_is_error() {
        let synth = RetrievalSynthesizer::new(Arc::new(Silent));
        assert!(synth.refine("a", "q", &[]).await.is_err());
        assert!(synth.merge(&[], "q").await.unwrap_err().is_invalid_input());
    }
}
