//! The decision loop.
//!
//! ```text
//! Classifying ─▶ ModalityDetection ─▶ Routing ─▶ Executing ─▶ Evaluating ─▶ [Refining]* ─▶ Finalizing
//! ```
//!
//! Every request reaches `Finalizing`. Failures along the way degrade the
//! route (default complexity, fallback to the simple workflow) and are
//! recorded on the response as warnings or errors. Only an empty query is
//! rejected outright.
//!
//! Routing precedence for a request:
//!
//! 1. the [`RoutingAdvisor`], when configured and enabled, for text queries
//!    with a real complexity score (an ensemble pick may be vetoed by the
//!    [`ConsensusVoter`])
//! 2. the agent, for text queries that are hard, mention code, or force it
//! 3. the multimodal workflow, when an image or audio is attached
//! 4. the complex workflow, above the complexity threshold
//! 5. the simple workflow

mod refine;
pub mod response;
pub mod routing;
pub mod state;
mod workflows;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{Instrument, debug, info};

use crate::config::OrchestratorConfig;
use crate::embedding::tokenize;
use crate::error::{HlcsError, HlcsResult};
use crate::flags::{self, FeatureFlags};
use crate::services::{
    AgentRunner, ComplexityClassifier, ContextRetriever, HeuristicEvaluator, LanguageModel,
    MediaAnalyzer, QualityEvaluator, RetrievalSynthesizer, TemplateResponder,
};
use crate::telemetry::request_span;

pub use response::{OrchestrationResponse, QueryRequest, ResponseMetadata};
pub use routing::{
    Component, ConsensusOutcome, ConsensusRule, ConsensusVoter, DecisionRecord, DecisionStrategy,
    IgnoranceAssessment, KnowledgeGap, Proposal, Role, RoutingAdvisor, RoutingContext,
    RoutingDecision, SelfDoubt, Stakeholder, StrategyAdvisor, Vote, VotePolicy, WeightedConsensus,
};
pub use state::{Modality, OrchestrationState, Phase, Strategy, ToolCallRecord};

/// Telemetry name of the classification call.
pub const CLASSIFY_CALL: &str = "classifier.classify";
/// Telemetry name of every retrieval call.
pub const RETRIEVAL_CALL: &str = "retriever.search";
pub const VISION_CALL: &str = "vision.analyze";
pub const AUDIO_CALL: &str = "audio.transcribe";
pub const EVALUATE_CALL: &str = "evaluator.evaluate";
pub const REFINE_CALL: &str = "llm.refine";
pub const MERGE_CALL: &str = "llm.merge";

/// Routes queries among the configured backends and refines the answer.
pub struct Orchestrator {
    config: OrchestratorConfig,
    flags: FeatureFlags,
    classifier: Arc<dyn ComplexityClassifier>,
    responder: Arc<dyn TemplateResponder>,
    synthesizer: Arc<RetrievalSynthesizer>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    media: Option<Arc<dyn MediaAnalyzer>>,
    evaluator: Arc<dyn QualityEvaluator>,
    agent: Option<Arc<dyn AgentRunner>>,
    advisor: Option<Arc<dyn RoutingAdvisor>>,
    voter: Option<Arc<dyn ConsensusVoter>>,
}

/// Wires an [`Orchestrator`]. Classifier, responder and language model
/// are required.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    flags: Option<FeatureFlags>,
    classifier: Option<Arc<dyn ComplexityClassifier>>,
    responder: Option<Arc<dyn TemplateResponder>>,
    llm: Option<Arc<dyn LanguageModel>>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    media: Option<Arc<dyn MediaAnalyzer>>,
    evaluator: Option<Arc<dyn QualityEvaluator>>,
    agent: Option<Arc<dyn AgentRunner>>,
    advisor: Option<Arc<dyn RoutingAdvisor>>,
    voter: Option<Arc<dyn ConsensusVoter>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ComplexityClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn responder(mut self, responder: Arc<dyn TemplateResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaAnalyzer>) -> Self {
        self.media = Some(media);
        self
    }

    /// Defaults to [`HeuristicEvaluator`].
    pub fn evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn agent(mut self, agent: Arc<dyn AgentRunner>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn RoutingAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn voter(mut self, voter: Arc<dyn ConsensusVoter>) -> Self {
        self.voter = Some(voter);
        self
    }

    pub fn build(self) -> HlcsResult<Orchestrator> {
        let classifier = self
            .classifier
            .ok_or_else(|| HlcsError::invalid("orchestrator needs a classifier"))?;
        let responder = self
            .responder
            .ok_or_else(|| HlcsError::invalid("orchestrator needs a responder"))?;
        let llm = self
            .llm
            .ok_or_else(|| HlcsError::invalid("orchestrator needs a language model"))?;

        Ok(Orchestrator {
            config: self.config,
            flags: self.flags.unwrap_or_default(),
            classifier,
            responder,
            synthesizer: Arc::new(RetrievalSynthesizer::new(llm)),
            retriever: self.retriever,
            media: self.media,
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Arc::new(HeuristicEvaluator::new())),
            agent: self.agent,
            advisor: self.advisor,
            voter: self.voter,
        })
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Every service backed by one remote tool server.
    #[cfg(feature = "http")]
    pub fn from_tool_client(
        client: Arc<crate::services::ToolClient>,
        config: OrchestratorConfig,
        flags: FeatureFlags,
    ) -> Self {
        Self {
            config,
            flags,
            classifier: client.clone(),
            responder: client.clone(),
            synthesizer: Arc::new(RetrievalSynthesizer::new(client.clone())),
            retriever: Some(client.clone()),
            media: Some(client),
            evaluator: Arc::new(HeuristicEvaluator::new()),
            agent: None,
            advisor: None,
            voter: None,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    /// Answer one request.
    ///
    /// Errors only when the query is empty; every other failure is folded
    /// into the response.
    pub async fn process(&self, request: QueryRequest) -> HlcsResult<OrchestrationResponse> {
        if request.query.trim().is_empty() {
            return Err(HlcsError::invalid("query must not be empty"));
        }

        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let span = request_span(&request_id);
        let mut state = OrchestrationState::new(request_id, request.query.clone());

        async {
            self.classify(&mut state, &request).await;

            state.enter(Phase::ModalityDetection);
            state.has_image = request.image_url.is_some();
            state.has_audio = request.audio_url.is_some();
            state.modality = if state.has_image || state.has_audio {
                Modality::Multimodal
            } else {
                Modality::Text
            };

            state.enter(Phase::Routing);
            let strategy = self.route(&mut state, &request).await;
            tracing::Span::current().record("strategy", strategy.as_str());

            state.enter(Phase::Executing);
            self.execute(&mut state, &request, strategy).await;

            state.enter(Phase::Evaluating);
            if self.config.rescore_answers {
                self.rescore(&mut state).await;
            }
            if self.flags.is_enabled(flags::QUALITY_REFINEMENT, request.user_id.as_deref()) {
                self.refine(&mut state).await;
            }

            state.enter(Phase::Finalizing);
            if state.final_result.trim().is_empty() {
                state.error("No answer was produced");
                state.answer(APOLOGY, 0.0);
            }
        }
        .instrument(span)
        .await;

        let response = OrchestrationResponse::finalize(state);
        info!(
            request_id = %response.request_id,
            strategy = response.strategy.as_str(),
            quality = response.quality_score,
            iterations = response.iterations,
            elapsed_ms = response.processing_time_ms,
            "Request processed"
        );
        Ok(response)
    }

    async fn classify(&self, state: &mut OrchestrationState, request: &QueryRequest) {
        state.enter(Phase::Classifying);
        let result = self
            .tracked(
                state,
                CLASSIFY_CALL,
                self.classifier.classify(&request.query, request.context.as_ref()),
            )
            .await;

        match result {
            Ok(complexity) => {
                state.complexity = complexity.clamp(0.0, 1.0);
                state.classified = true;
            }
            Err(e) => {
                state.complexity = DEFAULT_COMPLEXITY;
                state.warn(format!("Classification failed, assuming {DEFAULT_COMPLEXITY}: {e}"));
            }
        }
        tracing::Span::current().record("complexity", state.complexity);
        debug!(complexity = state.complexity, "Query classified");
    }

    async fn route(&self, state: &mut OrchestrationState, request: &QueryRequest) -> Strategy {
        let user = request.user_id.as_deref();
        let agent_enabled =
            self.agent.is_some() && self.flags.is_enabled(flags::AGENT_WORKFLOW, user);
        if state.classified && state.modality == Modality::Text {
            if let Some(strategy) = self.meta_route(state, request, agent_enabled).await {
                return strategy;
            }
        }

        if agent_enabled
            && state.modality == Modality::Text
            && (state.complexity >= self.config.agent_complexity_threshold
                || request.force_agent
                || self.mentions_code(&request.query))
        {
            return Strategy::Agent;
        }

        if state.modality == Modality::Multimodal {
            return Strategy::Multimodal;
        }

        if state.complexity > self.config.complexity_threshold {
            Strategy::Complex
        } else {
            Strategy::Simple
        }
    }

    /// `None` defers to the static policy.
    async fn meta_route(
        &self,
        state: &mut OrchestrationState,
        request: &QueryRequest,
        agent_enabled: bool,
    ) -> Option<Strategy> {
        let user = request.user_id.as_deref();
        let advisor = self.advisor.as_ref()?;
        if !self.flags.is_enabled(flags::META_ROUTING, user) {
            return None;
        }

        let context = RoutingContext {
            query: &request.query,
            complexity: state.complexity,
            modality: state.modality,
            agent_available: agent_enabled,
            media_available: self.media.is_some(),
            user_id: user,
            context: request.context.as_ref(),
        };
        let decision = match advisor.advise(&context).await {
            Ok(d) => d,
            Err(e) => {
                state.warn(format!("Routing advisor failed: {e}"));
                return None;
            }
        };
        state.extra.insert(
            "routing".into(),
            json!({
                "primary": decision.primary,
                "confidence": decision.confidence,
                "reasoning": decision.reasoning,
                "gaps": decision.gaps,
            }),
        );

        match decision.primary {
            Component::Responder => None,
            Component::Agent if agent_enabled => Some(Strategy::Agent),
            Component::Ensemble if agent_enabled => {
                let Some(voter) = self
                    .voter
                    .as_ref()
                    .filter(|_| self.flags.is_enabled(flags::CONSENSUS_VOTING, user))
                else {
                    return Some(Strategy::Ensemble);
                };

                let proposal = Proposal {
                    decision: &decision,
                    criticality: state.complexity,
                    requested_by: user,
                };
                match voter.vote(&proposal).await {
                    Ok(outcome) => {
                        state.extra.insert(
                            "consensus".into(),
                            json!({"approved": outcome.approved, "rule": outcome.rule, "weighted_approval": outcome.weighted_approval}),
                        );
                        if outcome.approved {
                            Some(Strategy::Ensemble)
                        } else {
                            state.warn("Ensemble vetoed by consensus, using services");
                            None
                        }
                    }
                    Err(e) => {
                        state.warn(format!("Consensus vote failed, using services: {e}"));
                        None
                    }
                }
            }
            Component::Agent | Component::Ensemble => None,
        }
    }

    /// Whole-word (prefix) match so "capital" does not hit "api".
    fn mentions_code(&self, query: &str) -> bool {
        tokenize(query).iter().any(|token| {
            self.config
                .code_keywords
                .iter()
                .any(|kw| token.starts_with(kw.as_str()))
        })
    }

    /// Run `fut` under the per-call deadline and record it.
    async fn tracked<T, F>(&self, state: &mut OrchestrationState, name: &str, fut: F) -> HlcsResult<T>
    where
        F: Future<Output = HlcsResult<T>>,
    {
        let (result, record) = self.timed(name, fut).await;
        state.record(record);
        result
    }

    /// Run `fut` under the per-call deadline, returning its telemetry.
    async fn timed<T, F>(&self, name: &str, fut: F) -> (HlcsResult<T>, ToolCallRecord)
    where
        F: Future<Output = HlcsResult<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.call_timeout(), fut).await {
            Ok(r) => r,
            Err(_) => Err(HlcsError::Timeout {
                service: name.to_string(),
                after_ms: self.config.call_timeout_ms,
            }),
        };
        let record = ToolCallRecord {
            name: name.to_string(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        (result, record)
    }
}

const DEFAULT_COMPLEXITY: f32 = 0.5;
const APOLOGY: &str = "Sorry, I could not process your request.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::KeywordClassifier;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;

    struct Canned;

    #[async_trait]
    impl TemplateResponder for Canned {
        async fn respond(&self, _q: &str, _c: Option<&JsonValue>) -> HlcsResult<String> {
            Ok("hello!".into())
        }
    }

    #[async_trait]
    impl LanguageModel for Canned {
        async fn generate(&self, _prompt: &str) -> HlcsResult<String> {
            Ok("generated".into())
        }
    }

    #[test]
    fn test_builder_requires_core_services() {
        let err = Orchestrator::builder().build().err().unwrap();
        assert!(err.is_invalid_input());

        let built = Orchestrator::builder()
            .classifier(Arc::new(KeywordClassifier::new()))
            .responder(Arc::new(Canned))
            .language_model(Arc::new(Canned))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn test_code_keywords_match_whole_words() {
        let orch = Orchestrator::builder()
            .classifier(Arc::new(KeywordClassifier::new()))
            .responder(Arc::new(Canned))
            .language_model(Arc::new(Canned))
            .build()
            .unwrap();
        assert!(orch.mentions_code("write a script to rename files"));
        assert!(orch.mentions_code("Implementing REST endpoints"));
        assert!(!orch.mentions_code("what is the capital of France"));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let orch = Orchestrator::builder()
            .classifier(Arc::new(KeywordClassifier::new()))
            .responder(Arc::new(Canned))
            .language_model(Arc::new(Canned))
            .build()
            .unwrap();
        let err = orch.process(QueryRequest::new("  ")).await.unwrap_err();
        assert!(err.is_invalid_input());
    }
}
