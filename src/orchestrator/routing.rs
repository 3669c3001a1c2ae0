//! Meta routing and stakeholder consensus.
//!
//! A [`RoutingAdvisor`] may override the static routing policy for text
//! queries. The [`StrategyAdvisor`] weighs what it knows it cannot cover
//! ([`IgnoranceAssessment`]) and how much evidence it has ([`SelfDoubt`])
//! before choosing. When it asks for an ensemble, a [`ConsensusVoter`] can veto
//! the decision, in which case routing falls back to the static policy.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::debug;

use super::state::Modality;
use crate::embedding::tokenize;
use crate::error::HlcsResult;

/// What the advisor wants to handle the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// The regular service workflows chosen by the static policy.
    Responder,
    Agent,
    Ensemble,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub primary: Component,
    pub use_ensemble: bool,
    /// The advisor's confidence that the services alone suffice.
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default)]
    pub gaps: Vec<KnowledgeGap>,
}

/// What the advisor sees of a request.
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    pub query: &'a str,
    pub complexity: f32,
    pub modality: Modality,
    pub agent_available: bool,
    pub media_available: bool,
    pub user_id: Option<&'a str>,
    /// Caller-supplied request context. Non-empty `user_history` and
    /// `memory_episodes` entries count as evidence.
    pub context: Option<&'a JsonValue>,
}

impl RoutingContext<'_> {
    fn has(&self, key: &str) -> bool {
        self.context.and_then(|c| c.get(key)).is_some_and(truthy)
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

#[async_trait]
pub trait RoutingAdvisor: Send + Sync {
    async fn advise(&self, context: &RoutingContext<'_>) -> HlcsResult<RoutingDecision>;

    fn name(&self) -> &str {
        "advisor"
    }
}

// ---------------------------------------------------------------------------
// Self-assessment
// ---------------------------------------------------------------------------

const MEDIA_WORDS: &[&str] = &["image", "video", "audio"];
const EXECUTION_WORDS: &[&str] = &["run", "execute", "test", "debug"];
const SPECIALISED_DOMAINS: &[&str] = &["medical", "legal", "financial", "scientific"];

/// Something the system knows it cannot cover well for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeGap {
    /// No user history in the request context.
    ColdStart,
    /// Media is mentioned but no media analyzer is wired.
    MediaTools,
    /// Code execution is asked for but no agent can run it.
    CodeExecution,
    SpecialisedDomain,
}

/// Known gaps for one request, and how sure we are about them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IgnoranceAssessment {
    pub gaps: Vec<KnowledgeGap>,
    pub certainty: f32,
}

impl IgnoranceAssessment {
    pub fn assess(context: &RoutingContext<'_>) -> Self {
        let tokens = tokenize(context.query);
        let mut gaps = Vec::new();

        if !context.has("user_history") {
            gaps.push(KnowledgeGap::ColdStart);
        }
        if mentions(&tokens, MEDIA_WORDS) && !context.media_available {
            gaps.push(KnowledgeGap::MediaTools);
        }
        if mentions(&tokens, EXECUTION_WORDS) && !context.agent_available {
            gaps.push(KnowledgeGap::CodeExecution);
        }
        if mentions(&tokens, SPECIALISED_DOMAINS) {
            gaps.push(KnowledgeGap::SpecialisedDomain);
        }

        // Named gaps are known unknowns; none named means we cannot see them.
        let certainty = if gaps.is_empty() { 0.3 } else { 0.8 };
        Self { gaps, certainty }
    }

    pub fn has(&self, gap: KnowledgeGap) -> bool {
        self.gaps.contains(&gap)
    }
}

fn mentions(tokens: &[String], words: &[&str]) -> bool {
    tokens
        .iter()
        .any(|token| words.iter().any(|word| token.starts_with(word)))
}

/// Signals that lower confidence in a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelfDoubt {
    /// `1 - complexity`, less 0.15 per known gap, floored at 0.2.
    pub base_confidence: f32,
    /// Longer queries state their intent more clearly.
    pub reasoning_clarity: f32,
    pub evidence_strength: f32,
    /// Workflows that could plausibly answer.
    pub alternatives: usize,
    pub uncertainty: f32,
}

impl SelfDoubt {
    pub fn measure(context: &RoutingContext<'_>, ignorance: &IgnoranceAssessment) -> Self {
        let base_confidence = ((1.0 - context.complexity.clamp(0.0, 1.0))
            - 0.15 * ignorance.gaps.len() as f32)
            .max(0.2);

        let words = context.query.split_whitespace().count();
        let reasoning_clarity = (0.5 + words as f32 / 100.0).min(1.0);

        let mut evidence_strength = 0.5;
        if context.has("user_history") {
            evidence_strength += 0.3;
        }
        if context.has("memory_episodes") {
            evidence_strength += 0.2;
        }

        // simple and complex always; multimodal with media; agent and ensemble with an agent
        let alternatives =
            2 + usize::from(context.media_available) + 2 * usize::from(context.agent_available);

        Self {
            base_confidence,
            reasoning_clarity,
            evidence_strength,
            alternatives,
            uncertainty: 1.0 - ignorance.certainty,
        }
    }

    /// Weighted confidence in [0, 1]; many alternatives cost up to 0.2.
    pub fn composite(&self) -> f32 {
        let alternative_penalty = (self.alternatives as f32 * 0.05).min(0.2);
        (0.35 * self.base_confidence
            + 0.25 * self.reasoning_clarity
            + 0.25 * self.evidence_strength
            + 0.15 * (1.0 - self.uncertainty)
            - alternative_penalty)
            .clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Strategy advisor
// ---------------------------------------------------------------------------

const DECISION_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    /// Services when confident, otherwise the agent.
    Conservative,
    /// Always the agent.
    Exploratory,
    /// Always both.
    Balanced,
    /// Follows known gaps first, then confidence bands.
    #[default]
    Adaptive,
}

/// One past decision, kept for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy: DecisionStrategy,
    pub primary: Component,
    pub confidence: f32,
    pub gaps: Vec<KnowledgeGap>,
}

/// Advisor that scores its own ignorance and doubt before choosing a
/// component, remembering its last 100 decisions.
#[derive(Debug)]
pub struct StrategyAdvisor {
    strategy: DecisionStrategy,
    confidence_threshold: f32,
    history: Mutex<VecDeque<DecisionRecord>>,
}

impl Default for StrategyAdvisor {
    fn default() -> Self {
        Self::new(DecisionStrategy::Adaptive)
    }
}

impl StrategyAdvisor {
    pub fn new(strategy: DecisionStrategy) -> Self {
        Self {
            strategy,
            confidence_threshold: 0.7,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn decide(&self, context: &RoutingContext<'_>) -> RoutingDecision {
        let ignorance = IgnoranceAssessment::assess(context);
        let confidence = SelfDoubt::measure(context, &ignorance).composite();

        let (primary, reasoning) = if !context.agent_available {
            (Component::Responder, "no agent available".to_string())
        } else {
            match self.strategy {
                DecisionStrategy::Conservative if confidence > self.confidence_threshold => (
                    Component::Responder,
                    format!("confidence {confidence:.2} above {:.2}", self.confidence_threshold),
                ),
                DecisionStrategy::Conservative => (
                    Component::Agent,
                    format!("confidence {confidence:.2} too low for services alone"),
                ),
                DecisionStrategy::Exploratory => (Component::Agent, "exploratory".to_string()),
                DecisionStrategy::Balanced => (Component::Ensemble, "balanced".to_string()),
                DecisionStrategy::Adaptive => Self::adapt(&ignorance, confidence),
            }
        };

        RoutingDecision {
            primary,
            use_ensemble: primary == Component::Ensemble,
            confidence,
            reasoning,
            gaps: ignorance.gaps,
        }
    }

    fn adapt(ignorance: &IgnoranceAssessment, confidence: f32) -> (Component, String) {
        if ignorance.gaps.is_empty() {
            return (Component::Responder, "no known gaps, services suffice".to_string());
        }
        if ignorance.has(KnowledgeGap::MediaTools) {
            return (Component::Responder, "media tools live in the services".to_string());
        }
        if ignorance.has(KnowledgeGap::SpecialisedDomain) {
            return (Component::Agent, "specialised domain needs agent retrieval".to_string());
        }
        if confidence > 0.75 {
            (Component::Responder, format!("high confidence {confidence:.2}"))
        } else if confidence > 0.5 {
            (Component::Agent, format!("medium confidence {confidence:.2}"))
        } else {
            (Component::Ensemble, format!("low confidence {confidence:.2}"))
        }
    }

    /// Past decisions, oldest first.
    pub async fn history(&self) -> Vec<DecisionRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn average_confidence(&self) -> Option<f32> {
        let history = self.history.lock().await;
        if history.is_empty() {
            return None;
        }
        Some(history.iter().map(|d| d.confidence).sum::<f32>() / history.len() as f32)
    }

    async fn remember(&self, decision: &RoutingDecision) {
        let mut history = self.history.lock().await;
        if history.len() == DECISION_HISTORY {
            history.pop_front();
        }
        history.push_back(DecisionRecord {
            timestamp: Utc::now(),
            strategy: self.strategy,
            primary: decision.primary,
            confidence: decision.confidence,
            gaps: decision.gaps.clone(),
        });
    }
}

#[async_trait]
impl RoutingAdvisor for StrategyAdvisor {
    async fn advise(&self, context: &RoutingContext<'_>) -> HlcsResult<RoutingDecision> {
        let decision = self.decide(context);
        debug!(
            primary = ?decision.primary,
            confidence = decision.confidence,
            gaps = decision.gaps.len(),
            "Routing advice"
        );
        self.remember(&decision).await;
        Ok(decision)
    }

    fn name(&self) -> &str {
        "strategy_advisor"
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PrimaryUser,
    Operator,
    AutonomousAgent,
    Observer,
}

impl Role {
    pub fn weight(&self) -> f32 {
        match self {
            Role::PrimaryUser => 0.6,
            Role::Operator => 0.3,
            Role::AutonomousAgent => 0.1,
            Role::Observer => 0.0,
        }
    }
}

/// How a stakeholder votes when asked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum VotePolicy {
    FollowRecommendation,
    /// Approve while criticality is below the bound.
    ApproveBelow { criticality: f32 },
    Reject,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub id: String,
    pub role: Role,
    pub policy: VotePolicy,
}

impl Stakeholder {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            policy: VotePolicy::FollowRecommendation,
        }
    }

    pub fn with_policy(mut self, policy: VotePolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
    Abstain,
}

/// The bar a proposal must clear, picked by criticality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRule {
    /// More than half of the votes cast.
    SimpleMajority,
    /// At least 60% of the voting weight.
    WeightedApproval,
    /// At least two thirds of the votes cast.
    Supermajority,
}

impl ConsensusRule {
    pub fn for_criticality(criticality: f32) -> Self {
        if criticality >= 0.8 {
            ConsensusRule::Supermajority
        } else if criticality >= 0.5 {
            ConsensusRule::WeightedApproval
        } else {
            ConsensusRule::SimpleMajority
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Proposal<'a> {
    pub decision: &'a RoutingDecision,
    /// In [0, 1]; the orchestrator passes the query complexity.
    pub criticality: f32,
    pub requested_by: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub approved: bool,
    pub rule: ConsensusRule,
    pub weighted_approval: f32,
    pub votes: Vec<(String, Vote)>,
}

#[async_trait]
pub trait ConsensusVoter: Send + Sync {
    async fn vote(&self, proposal: &Proposal<'_>) -> HlcsResult<ConsensusOutcome>;
}

/// Role-weighted voting among registered stakeholders.
///
/// The requesting user approves implicitly when registered as a
/// `PrimaryUser`; everyone else votes by policy. Abstentions are not
/// counted. With no votes cast the proposal is rejected.
#[derive(Debug, Clone, Default)]
pub struct WeightedConsensus {
    stakeholders: Vec<Stakeholder>,
}

impl WeightedConsensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stakeholder(mut self, stakeholder: Stakeholder) -> Self {
        self.register(stakeholder);
        self
    }

    /// Add or replace a stakeholder by id.
    pub fn register(&mut self, stakeholder: Stakeholder) {
        self.stakeholders.retain(|s| s.id != stakeholder.id);
        self.stakeholders.push(stakeholder);
    }

    pub fn stakeholders(&self) -> &[Stakeholder] {
        &self.stakeholders
    }

    fn cast(stakeholder: &Stakeholder, proposal: &Proposal<'_>) -> Vote {
        if stakeholder.role == Role::PrimaryUser
            && proposal.requested_by == Some(stakeholder.id.as_str())
        {
            return Vote::Approve;
        }
        match stakeholder.policy {
            VotePolicy::FollowRecommendation => Vote::Approve,
            VotePolicy::ApproveBelow { criticality } if proposal.criticality < criticality => {
                Vote::Approve
            }
            VotePolicy::ApproveBelow { .. } | VotePolicy::Reject => Vote::Reject,
            VotePolicy::Abstain => Vote::Abstain,
        }
    }

    pub fn tally(&self, proposal: &Proposal<'_>) -> ConsensusOutcome {
        let rule = ConsensusRule::for_criticality(proposal.criticality);
        let votes: Vec<(String, Vote)> = self
            .stakeholders
            .iter()
            .map(|s| (s.id.clone(), Self::cast(s, proposal)))
            .collect();

        let mut cast = 0usize;
        let mut approvals = 0usize;
        let mut weight_cast = 0.0f32;
        let mut weight_approved = 0.0f32;
        for (s, (_, vote)) in self.stakeholders.iter().zip(&votes) {
            if *vote == Vote::Abstain {
                continue;
            }
            cast += 1;
            weight_cast += s.role.weight();
            if *vote == Vote::Approve {
                approvals += 1;
                weight_approved += s.role.weight();
            }
        }

        let weighted_approval = if weight_cast > 0.0 {
            weight_approved / weight_cast
        } else {
            0.0
        };
        let share = if cast > 0 {
            approvals as f32 / cast as f32
        } else {
            0.0
        };

        let approved = cast > 0
            && match rule {
                ConsensusRule::SimpleMajority => share > 0.5,
                ConsensusRule::WeightedApproval => weighted_approval >= 0.6,
                ConsensusRule::Supermajority => share >= 2.0 / 3.0,
            };

        ConsensusOutcome {
            approved,
            rule,
            weighted_approval,
            votes,
        }
    }
}

#[async_trait]
impl ConsensusVoter for WeightedConsensus {
    async fn vote(&self, proposal: &Proposal<'_>) -> HlcsResult<ConsensusOutcome> {
        let outcome = self.tally(proposal);
        debug!(
            approved = outcome.approved,
            rule = ?outcome.rule,
            weighted_approval = outcome.weighted_approval,
            "Consensus reached"
        );
        Ok(outcome)
    }
}
