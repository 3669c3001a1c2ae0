//! The closed set of answer generators a workflow can dispatch to.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{AgentRunner, RetrievalSynthesizer, TemplateResponder};
use crate::error::HlcsResult;

/// Inputs shared by every generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationRequest<'a> {
    pub query: &'a str,
    pub research: &'a [String],
    pub context: Option<&'a JsonValue>,
    pub user_id: Option<&'a str>,
    pub session_id: Option<&'a str>,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn with_research(mut self, research: &'a [String]) -> Self {
        self.research = research;
        self
    }

    pub fn with_context(mut self, context: Option<&'a JsonValue>) -> Self {
        self.context = context;
        self
    }

    pub fn with_identity(mut self, user_id: Option<&'a str>, session_id: Option<&'a str>) -> Self {
        self.user_id = user_id;
        self.session_id = session_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOutput {
    pub text: String,
    /// Only the agent sets this, when its tool-using strategy answered.
    pub used_tools_strategy: bool,
}

/// Template responder, retrieval-augmented synthesizer, or local agent.
#[derive(Clone)]
pub enum Generator {
    Template(Arc<dyn TemplateResponder>),
    Synthesizer(Arc<RetrievalSynthesizer>),
    Agent(Arc<dyn AgentRunner>),
}

impl Generator {
    pub fn name(&self) -> &'static str {
        match self {
            Generator::Template(_) => "template",
            Generator::Synthesizer(_) => "synthesizer",
            Generator::Agent(_) => "agent",
        }
    }

    /// Name recorded in tool-call telemetry.
    pub fn call_name(&self) -> &'static str {
        match self {
            Generator::Template(_) => "responder.respond",
            Generator::Synthesizer(_) => "llm.synthesize",
            Generator::Agent(_) => "agent.run",
        }
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> HlcsResult<GeneratorOutput> {
        match self {
            Generator::Template(responder) => {
                let text = responder.respond(request.query, request.context).await?;
                Ok(GeneratorOutput {
                    text,
                    used_tools_strategy: false,
                })
            }
            Generator::Synthesizer(synth) => {
                let text = synth
                    .synthesize(request.query, request.research, request.context)
                    .await?;
                Ok(GeneratorOutput {
                    text,
                    used_tools_strategy: false,
                })
            }
            Generator::Agent(agent) => {
                let outcome = agent
                    .run(request.query, request.user_id, request.session_id)
                    .await?;
                Ok(GeneratorOutput {
                    text: outcome.answer,
                    used_tools_strategy: outcome.used_tools_strategy,
                })
            }
        }
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Generator").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{AgentOutcome, LanguageModel};
    use async_trait::async_trait;

    struct Upper;

    #[async_trait]
    impl TemplateResponder for Upper {
        async fn respond(&self, query: &str, _context: Option<&JsonValue>) -> HlcsResult<String> {
            Ok(query.to_uppercase())
        }
    }

    struct Snippets;

    #[async_trait]
    impl LanguageModel for Snippets {
        async fn generate(&self, prompt: &str) -> HlcsResult<String> {
            Ok(format!("{} lines", prompt.lines().count()))
        }
    }

    struct Tooling;

    #[async_trait]
    impl AgentRunner for Tooling {
        async fn run(
            &self,
            query: &str,
            _user_id: Option<&str>,
            _session_id: Option<&str>,
        ) -> HlcsResult<AgentOutcome> {
            Ok(AgentOutcome {
                answer: format!("agent: {query}"),
                used_tools_strategy: true,
                steps: 2,
                latency_ms: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_dispatch() {
        let research = vec!["a".to_string(), "b".to_string()];
        let req = GenerationRequest::new("hi").with_research(&research);

        let out = Generator::Template(Arc::new(Upper)).generate(&req).await.unwrap();
        assert_eq!(out.text, "HI");
        assert!(!out.used_tools_strategy);

        let synth = Arc::new(RetrievalSynthesizer::new(Arc::new(Snippets)));
        let out = Generator::Synthesizer(synth).generate(&req).await.unwrap();
        assert!(out.text.ends_with("lines"));

        let agent = Generator::Agent(Arc::new(Tooling));
        assert_eq!(agent.call_name(), "agent.run");
        let out = agent.generate(&req).await.unwrap();
        assert_eq!(out.text, "agent: hi");
        assert!(out.used_tools_strategy);
    }
}
