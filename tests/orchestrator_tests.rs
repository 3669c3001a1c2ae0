/// End-to-end tests for the orchestrator decision loop.
///
/// Every backend is an in-process stub so routing, fallback, refinement
/// and the meta-routing layers can be driven deterministically.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hlcs::config::OrchestratorConfig;
use hlcs::flags::{self, FeatureFlags};
use hlcs::orchestrator::{
    CLASSIFY_CALL, DecisionStrategy, EVALUATE_CALL, MERGE_CALL, REFINE_CALL, RETRIEVAL_CALL,
    Role, Stakeholder, StrategyAdvisor, VISION_CALL, VotePolicy, WeightedConsensus,
};
use hlcs::services::{
    AgentOutcome, AgentRunner, ComplexityClassifier, ContextRetriever, KeywordClassifier,
    LanguageModel, MediaAnalyzer, QualityEvaluator, QualityReport, TemplateResponder,
};
use hlcs::{
    HlcsError, HlcsResult, JsonValue, Modality, Orchestrator, OrchestratorBuilder, QueryRequest,
    Strategy, json,
};

// ============================================================================
// Stub services
// ============================================================================

struct FixedClassifier(f32);

#[async_trait]
impl ComplexityClassifier for FixedClassifier {
    async fn classify(&self, _query: &str, _context: Option<&JsonValue>) -> HlcsResult<f32> {
        Ok(self.0)
    }
}

struct FailingClassifier;

#[async_trait]
impl ComplexityClassifier for FailingClassifier {
    async fn classify(&self, _query: &str, _context: Option<&JsonValue>) -> HlcsResult<f32> {
        Err(HlcsError::upstream("classifier", "connection refused"))
    }
}

struct SlowClassifier(Duration);

#[async_trait]
impl ComplexityClassifier for SlowClassifier {
    async fn classify(&self, _query: &str, _context: Option<&JsonValue>) -> HlcsResult<f32> {
        tokio::time::sleep(self.0).await;
        Ok(0.9)
    }
}

struct EchoResponder;

#[async_trait]
impl TemplateResponder for EchoResponder {
    async fn respond(&self, query: &str, _context: Option<&JsonValue>) -> HlcsResult<String> {
        Ok(format!("Template answer to: {query}"))
    }
}

/// Answers every prompt with a fixed text and counts calls.
struct ScriptedLlm {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate(&self, _prompt: &str) -> HlcsResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct BrokenLlm;

#[async_trait]
impl LanguageModel for BrokenLlm {
    async fn generate(&self, _prompt: &str) -> HlcsResult<String> {
        Err(HlcsError::upstream("llm", "model overloaded"))
    }
}

/// Fails any prompt containing `marker`, answers the rest.
struct SelectiveLlm {
    marker: &'static str,
}

#[async_trait]
impl LanguageModel for SelectiveLlm {
    async fn generate(&self, prompt: &str) -> HlcsResult<String> {
        if prompt.contains(self.marker) {
            return Err(HlcsError::upstream("llm", "context window exceeded"));
        }
        Ok(LLM_REPLY.to_string())
    }
}

/// Answers the first `budget` prompts, then fails.
struct FlakyLlm {
    budget: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for FlakyLlm {
    async fn generate(&self, _prompt: &str) -> HlcsResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.budget {
            Ok(LLM_REPLY.to_string())
        } else {
            Err(HlcsError::upstream("llm", "rate limited"))
        }
    }
}

struct StaticRetriever(Vec<String>);

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn search(&self, _query: &str, k: usize) -> HlcsResult<Vec<String>> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
}

struct StubMedia;

#[async_trait]
impl MediaAnalyzer for StubMedia {
    async fn analyze_image(&self, _image_url: &str, _query: &str) -> HlcsResult<String> {
        Ok("a spiral galaxy".to_string())
    }

    async fn transcribe_audio(&self, _audio_url: &str) -> HlcsResult<String> {
        Err(HlcsError::upstream("audio", "unsupported codec"))
    }
}

struct StubAgent;

#[async_trait]
impl AgentRunner for StubAgent {
    async fn run(
        &self,
        query: &str,
        _user_id: Option<&str>,
        _session_id: Option<&str>,
    ) -> HlcsResult<AgentOutcome> {
        Ok(AgentOutcome {
            answer: format!("Agent worked through: {query}"),
            used_tools_strategy: true,
            steps: 2,
            latency_ms: 3,
        })
    }
}

struct FailingAgent;

#[async_trait]
impl AgentRunner for FailingAgent {
    async fn run(
        &self,
        _query: &str,
        _user_id: Option<&str>,
        _session_id: Option<&str>,
    ) -> HlcsResult<AgentOutcome> {
        Err(HlcsError::upstream("agent", "sandbox crashed"))
    }
}

struct BrokenEvaluator;

#[async_trait]
impl QualityEvaluator for BrokenEvaluator {
    async fn evaluate(&self, _answer: &str, _query: &str) -> HlcsResult<QualityReport> {
        Err(HlcsError::upstream("evaluator", "judge unavailable"))
    }
}

/// Never satisfied.
struct HarshEvaluator;

#[async_trait]
impl QualityEvaluator for HarshEvaluator {
    async fn evaluate(&self, _answer: &str, _query: &str) -> HlcsResult<QualityReport> {
        Ok(QualityReport {
            score: 0.3,
            issues: vec!["too vague".to_string()],
        })
    }
}

const LLM_REPLY: &str = "Black holes are regions where gravity is so strong that nothing, \
                         not even light, can escape once it crosses the event horizon.";

fn base() -> OrchestratorBuilder {
    Orchestrator::builder()
        .responder(Arc::new(EchoResponder))
        .language_model(ScriptedLlm::new(LLM_REPLY))
}

fn knowledge() -> Arc<StaticRetriever> {
    Arc::new(StaticRetriever(vec![
        "Black holes form when massive stars collapse.".to_string(),
        "The event horizon is the point of no return.".to_string(),
    ]))
}

// ============================================================================
// Static routing
// ============================================================================

#[tokio::test]
async fn test_greeting_takes_simple_route() {
    let orchestrator = base()
        .classifier(Arc::new(KeywordClassifier::new()))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hola")).await.unwrap();
    assert_eq!(response.strategy, Strategy::Simple);
    assert_eq!(response.modality, Modality::Text);
    assert!(response.complexity < 0.1);
    assert!(!response.result.is_empty());
    assert_eq!(response.iterations, 0);
    assert!(response.errors.is_empty());
    assert_eq!(response.call_names(), vec![CLASSIFY_CALL, "responder.respond"]);
}

#[tokio::test]
async fn test_detailed_question_researches_then_synthesizes() {
    let orchestrator = base()
        .classifier(Arc::new(KeywordClassifier::new()))
        .retriever(knowledge())
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("explain black holes in detail"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Complex);
    assert!(response.complexity > 0.5);
    assert!(response.metadata.research_done);
    assert_eq!(response.result, LLM_REPLY);

    let calls = response.call_names();
    let search = calls.iter().position(|c| *c == RETRIEVAL_CALL).unwrap();
    let synth = calls.iter().position(|c| *c == "llm.synthesize").unwrap();
    assert!(search < synth);
}

#[tokio::test]
async fn test_image_routes_multimodal() {
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.2)))
        .media(Arc::new(StubMedia))
        .build()
        .unwrap();

    let request = QueryRequest::new("what is in this picture?")
        .with_image("https://example.com/galaxy.png")
        .with_audio("https://example.com/note.ogg");
    let response = orchestrator.process(request).await.unwrap();

    assert_eq!(response.strategy, Strategy::Multimodal);
    assert_eq!(response.modality, Modality::Multimodal);
    assert!(response.metadata.has_image);
    assert!(response.metadata.vision_done);
    assert!(!response.metadata.audio_done);
    assert!(response.call_names().contains(&VISION_CALL));
    assert!(response.warnings.iter().any(|w| w.contains("Audio")));
    // Low complexity skips research.
    assert!(!response.metadata.research_done);
}

#[tokio::test]
async fn test_classifier_failure_defaults_to_simple() {
    let orchestrator = base()
        .classifier(Arc::new(FailingClassifier))
        .retriever(knowledge())
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("explain black holes in detail"))
        .await
        .unwrap();

    assert_eq!(response.complexity, 0.5);
    assert_eq!(response.strategy, Strategy::Simple);
    assert!(!response.result.is_empty());
    assert!(response.warnings.iter().any(|w| w.contains("Classification failed")));
    assert!(!response.metadata.tool_calls[0].success);
}

#[tokio::test]
async fn test_classifier_timeout_is_recorded() {
    let config = OrchestratorConfig {
        call_timeout_ms: 50,
        ..OrchestratorConfig::default()
    };
    let orchestrator = base()
        .config(config)
        .classifier(Arc::new(SlowClassifier(Duration::from_millis(500))))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hello")).await.unwrap();
    assert_eq!(response.strategy, Strategy::Simple);
    assert_eq!(response.complexity, 0.5);

    let classify = &response.metadata.tool_calls[0];
    assert_eq!(classify.name, CLASSIFY_CALL);
    assert!(!classify.success);
    assert!(classify.error.as_deref().unwrap_or("").contains("timed out"));
}

#[tokio::test]
async fn test_failed_workflow_falls_back_to_simple() {
    let orchestrator = Orchestrator::builder()
        .classifier(Arc::new(FixedClassifier(0.65)))
        .responder(Arc::new(EchoResponder))
        .language_model(Arc::new(BrokenLlm))
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("compare two sorting algorithms"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Simple);
    assert!(response.result.starts_with("Template answer"));
    assert!(response.warnings.iter().any(|w| w.contains("falling back to simple")));
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.1)))
        .build()
        .unwrap();

    let err = orchestrator.process(QueryRequest::new("  ")).await.unwrap_err();
    assert!(err.is_invalid_input());
}

// ============================================================================
// Agent routing
// ============================================================================

#[tokio::test]
async fn test_hard_query_goes_to_agent() {
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.85)))
        .agent(Arc::new(StubAgent))
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("plan a migration of our billing data"))
        .await
        .unwrap();
    assert_eq!(response.strategy, Strategy::Agent);
    assert!((response.quality_score - 0.9).abs() < 1e-6);
    assert!(response.call_names().contains(&"agent.run"));
}

#[tokio::test]
async fn test_force_agent_and_code_keywords() {
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.1)))
        .agent(Arc::new(StubAgent))
        .build()
        .unwrap();

    let forced = orchestrator
        .process(QueryRequest::new("what time is it").force_agent())
        .await
        .unwrap();
    assert_eq!(forced.strategy, Strategy::Agent);

    let code = orchestrator
        .process(QueryRequest::new("create a small script"))
        .await
        .unwrap();
    assert_eq!(code.strategy, Strategy::Agent);

    let plain = orchestrator
        .process(QueryRequest::new("what is the capital of France"))
        .await
        .unwrap();
    assert_eq!(plain.strategy, Strategy::Simple);
}

#[tokio::test]
async fn test_agent_flag_off_keeps_services() {
    let flags = FeatureFlags::default().with(flags::AGENT_WORKFLOW, false);
    let orchestrator = base()
        .flags(flags)
        .classifier(Arc::new(FixedClassifier(0.9)))
        .agent(Arc::new(StubAgent))
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("design a distributed cache"))
        .await
        .unwrap();
    assert_eq!(response.strategy, Strategy::Complex);
}

// ============================================================================
// Meta routing and consensus
// ============================================================================

#[tokio::test]
async fn test_balanced_advisor_runs_ensemble() {
    let llm = ScriptedLlm::new(LLM_REPLY);
    let orchestrator = Orchestrator::builder()
        .classifier(Arc::new(FixedClassifier(0.3)))
        .responder(Arc::new(EchoResponder))
        .language_model(llm.clone())
        .retriever(knowledge())
        .agent(Arc::new(StubAgent))
        .advisor(Arc::new(StrategyAdvisor::new(DecisionStrategy::Balanced)))
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Ensemble);
    assert!((response.quality_score - 0.95).abs() < 1e-6);
    assert_eq!(response.metadata.extra["ensemble_merged"], true);
    assert!(response.metadata.extra.contains_key("routing"));

    let calls = response.call_names();
    assert!(calls.contains(&"agent.run"));
    assert!(calls.contains(&MERGE_CALL));
    // synthesis for the retrieval branch plus the merge
    assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
}

fn ensemble_with(agent: Arc<dyn AgentRunner>, llm: Arc<dyn LanguageModel>) -> Orchestrator {
    Orchestrator::builder()
        .classifier(Arc::new(FixedClassifier(0.3)))
        .responder(Arc::new(EchoResponder))
        .language_model(llm)
        .retriever(knowledge())
        .agent(agent)
        .advisor(Arc::new(StrategyAdvisor::new(DecisionStrategy::Balanced)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_ensemble_with_only_retrieval_branch() {
    let orchestrator = ensemble_with(Arc::new(FailingAgent), ScriptedLlm::new(LLM_REPLY));

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Ensemble);
    assert_eq!(response.result, LLM_REPLY);
    assert!((response.quality_score - 0.80).abs() < 1e-6);
    assert!(!response.metadata.extra.contains_key("ensemble_merged"));
    assert!(!response.call_names().contains(&MERGE_CALL));
    assert!(response.warnings.iter().any(|w| w.contains("Agent branch failed")));
}

#[tokio::test]
async fn test_ensemble_with_only_agent_branch() {
    let orchestrator = ensemble_with(Arc::new(StubAgent), Arc::new(BrokenLlm));

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Ensemble);
    assert_eq!(response.result, "Agent worked through: tell me about black holes");
    assert!((response.quality_score - 0.85).abs() < 1e-6);
    assert!(response.warnings.iter().any(|w| w.contains("Retrieval branch synthesis failed")));
}

#[tokio::test]
async fn test_ensemble_with_no_branches_falls_back() {
    let orchestrator = ensemble_with(Arc::new(FailingAgent), Arc::new(BrokenLlm));

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Simple);
    assert_eq!(response.result, "Template answer to: tell me about black holes");
    assert!(response.warnings.iter().any(|w| w.contains("Agent branch failed")));
    assert!(response.warnings.iter().any(|w| w.contains("falling back to simple")));
}

#[tokio::test]
async fn test_failed_merge_keeps_best_candidate() {
    let llm = Arc::new(SelectiveLlm {
        marker: "Candidate answers:",
    });
    let orchestrator = ensemble_with(Arc::new(StubAgent), llm);

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();

    // Agent branch (0.85) outranks the retrieval branch (0.80).
    assert_eq!(response.strategy, Strategy::Ensemble);
    assert_eq!(response.result, "Agent worked through: tell me about black holes");
    assert!((response.quality_score - 0.85).abs() < 1e-6);
    assert!(response.call_names().contains(&MERGE_CALL));
    assert!(!response.metadata.extra.contains_key("ensemble_merged"));
    assert!(response.warnings.iter().any(|w| w.contains("Ensemble merge failed")));
}

#[tokio::test]
async fn test_consensus_veto_blocks_ensemble() {
    let voter = WeightedConsensus::new()
        .with_stakeholder(Stakeholder::new("ops", Role::Operator).with_policy(VotePolicy::Reject));
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.3)))
        .agent(Arc::new(StubAgent))
        .advisor(Arc::new(StrategyAdvisor::new(DecisionStrategy::Balanced)))
        .voter(Arc::new(voter))
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();

    assert_eq!(response.strategy, Strategy::Simple);
    assert_eq!(response.metadata.extra["consensus"]["approved"], false);
    assert!(response.warnings.iter().any(|w| w.contains("vetoed")));
}

#[tokio::test]
async fn test_requesting_user_carries_vote() {
    let voter = WeightedConsensus::new()
        .with_stakeholder(Stakeholder::new("ana", Role::PrimaryUser))
        .with_stakeholder(Stakeholder::new("ops", Role::Operator).with_policy(VotePolicy::Reject));
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.6)))
        .agent(Arc::new(StubAgent))
        .advisor(Arc::new(StrategyAdvisor::new(DecisionStrategy::Balanced)))
        .voter(Arc::new(voter))
        .build()
        .unwrap();

    let response = orchestrator
        .process(QueryRequest::new("tell me about black holes").with_user("ana"))
        .await
        .unwrap();

    // 0.6 of 0.9 voting weight approves under the weighted rule.
    assert_eq!(response.strategy, Strategy::Ensemble);
    assert_eq!(response.metadata.extra["consensus"]["approved"], true);
}

#[tokio::test]
async fn test_adaptive_advisor_weighs_request_context() {
    let advisor = Arc::new(StrategyAdvisor::default());
    let orchestrator = base()
        .classifier(Arc::new(FixedClassifier(0.3)))
        .retriever(knowledge())
        .agent(Arc::new(StubAgent))
        .advisor(advisor.clone())
        .build()
        .unwrap();

    // First contact: no history, low confidence, both branches.
    let cold = orchestrator
        .process(QueryRequest::new("tell me about black holes"))
        .await
        .unwrap();
    assert_eq!(cold.strategy, Strategy::Ensemble);
    assert_eq!(cold.metadata.extra["routing"]["gaps"], json!(["cold_start"]));

    // With history the advisor sees no gaps and defers to the static policy.
    let warm = orchestrator
        .process(
            QueryRequest::new("tell me about black holes")
                .with_context(json!({"user_history": ["what is a star?"]})),
        )
        .await
        .unwrap();
    assert_eq!(warm.strategy, Strategy::Simple);
    assert_eq!(warm.metadata.extra["routing"]["primary"], "responder");
    assert_eq!(warm.metadata.extra["routing"]["gaps"], json!([]));

    let history = advisor.history().await;
    assert_eq!(history.len(), 2);
    assert!(history[0].confidence < history[1].confidence);
}

#[tokio::test]
async fn test_meta_routing_skipped_when_classification_fails() {
    let orchestrator = base()
        .classifier(Arc::new(FailingClassifier))
        .agent(Arc::new(StubAgent))
        .advisor(Arc::new(StrategyAdvisor::new(DecisionStrategy::Exploratory)))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hello there")).await.unwrap();
    assert_eq!(response.strategy, Strategy::Simple);
    assert!(!response.metadata.extra.contains_key("routing"));
}

// ============================================================================
// Refinement
// ============================================================================

#[tokio::test]
async fn test_refinement_is_bounded() {
    let config = OrchestratorConfig {
        quality_threshold: 0.9,
        max_iterations: 3,
        ..OrchestratorConfig::default()
    };
    let orchestrator = base()
        .config(config)
        .classifier(Arc::new(FixedClassifier(0.1)))
        .evaluator(Arc::new(HarshEvaluator))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hi")).await.unwrap();
    assert_eq!(response.iterations, 3);
    assert!(response.quality_score < 0.9);
    assert_eq!(response.result, LLM_REPLY);

    let calls = response.call_names();
    assert_eq!(calls.iter().filter(|c| **c == EVALUATE_CALL).count(), 3);
    assert_eq!(calls.iter().filter(|c| **c == REFINE_CALL).count(), 3);
}

#[tokio::test]
async fn test_refinement_flag_off() {
    let config = OrchestratorConfig {
        quality_threshold: 0.9,
        ..OrchestratorConfig::default()
    };
    let orchestrator = base()
        .config(config)
        .flags(FeatureFlags::default().with(flags::QUALITY_REFINEMENT, false))
        .classifier(Arc::new(FixedClassifier(0.1)))
        .evaluator(Arc::new(HarshEvaluator))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hi")).await.unwrap();
    assert_eq!(response.iterations, 0);
    assert!((response.quality_score - 0.75).abs() < 1e-6);
}

#[tokio::test]
async fn test_rescoring_reports_issues() {
    let config = OrchestratorConfig {
        rescore_answers: true,
        max_iterations: 1,
        ..OrchestratorConfig::default()
    };
    let orchestrator = base()
        .config(config)
        .classifier(Arc::new(FixedClassifier(0.1)))
        .evaluator(Arc::new(HarshEvaluator))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hi")).await.unwrap();
    assert!(response.warnings.iter().any(|w| w == "Quality: too vague"));
    assert_eq!(response.iterations, 1);
}

#[tokio::test]
async fn test_evaluator_failure_stops_refinement() {
    let config = OrchestratorConfig {
        quality_threshold: 0.9,
        ..OrchestratorConfig::default()
    };
    let orchestrator = base()
        .config(config)
        .classifier(Arc::new(FixedClassifier(0.1)))
        .evaluator(Arc::new(BrokenEvaluator))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hi")).await.unwrap();
    assert_eq!(response.iterations, 1);
    assert_eq!(response.result, "Template answer to: hi");
    assert!((response.quality_score - 0.75).abs() < 1e-6);
    assert!(response.warnings.iter().any(|w| w.contains("Evaluation failed")));

    let calls = response.call_names();
    assert_eq!(calls.iter().filter(|c| **c == EVALUATE_CALL).count(), 1);
    assert!(!calls.contains(&REFINE_CALL));
}

#[tokio::test]
async fn test_rewrite_failure_keeps_last_good_answer() {
    let config = OrchestratorConfig {
        quality_threshold: 0.9,
        max_iterations: 3,
        ..OrchestratorConfig::default()
    };
    // The first rewrite succeeds, the second fails.
    let llm = Arc::new(FlakyLlm {
        budget: 1,
        calls: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::builder()
        .config(config)
        .classifier(Arc::new(FixedClassifier(0.1)))
        .responder(Arc::new(EchoResponder))
        .language_model(llm)
        .evaluator(Arc::new(HarshEvaluator))
        .build()
        .unwrap();

    let response = orchestrator.process(QueryRequest::new("hi")).await.unwrap();
    assert_eq!(response.iterations, 2);
    assert_eq!(response.result, LLM_REPLY);
    // 0.3 from the evaluator plus the 0.15 rewrite increment.
    assert!((response.quality_score - 0.45).abs() < 1e-6);
    assert!(response.warnings.iter().any(|w| w.contains("Refinement failed")));

    let calls = response.call_names();
    assert_eq!(calls.iter().filter(|c| **c == REFINE_CALL).count(), 2);
}
