//! Workflow execution with fallback to the simple workflow.

use std::sync::Arc;

use tracing::{debug, info};

use super::state::{OrchestrationState, Strategy, ToolCallRecord};
use super::{
    APOLOGY, AUDIO_CALL, MERGE_CALL, Orchestrator, QueryRequest, RETRIEVAL_CALL, VISION_CALL,
};
use crate::error::{HlcsError, HlcsResult};
use crate::services::{AgentRunner, Candidate, GenerationRequest, Generator, GeneratorOutput};

const SIMPLE_QUALITY: f32 = 0.75;
const COMPLEX_QUALITY: f32 = 0.7;
const MULTIMODAL_QUALITY: f32 = 0.75;
const AGENT_TOOLS_QUALITY: f32 = 0.9;
const AGENT_QUALITY: f32 = 0.8;
const MERGED_QUALITY: f32 = 0.95;
const AGENT_BRANCH_CONFIDENCE: f32 = 0.85;
const RETRIEVAL_BRANCH_CONFIDENCE: f32 = 0.80;

/// One ensemble branch: its answer (if any) and the calls it made.
type Branch = (Option<Candidate>, Vec<ToolCallRecord>, Vec<String>);

impl Orchestrator {
    /// Run `strategy`; on failure, record it and answer with the simple
    /// workflow instead.
    pub(super) async fn execute(
        &self,
        state: &mut OrchestrationState,
        request: &QueryRequest,
        strategy: Strategy,
    ) {
        info!(strategy = strategy.as_str(), complexity = state.complexity, "Executing workflow");
        state.strategy = strategy;

        let outcome = match strategy {
            Strategy::Simple => {
                self.simple(state, request).await;
                Ok(())
            }
            Strategy::Complex => self.complex(state, request).await,
            Strategy::Multimodal => self.multimodal(state, request).await,
            Strategy::Agent => self.agent_workflow(state, request).await,
            Strategy::Ensemble => self.ensemble(state, request).await,
        };

        if let Err(e) = outcome {
            state.warn(format!("{strategy} workflow failed, falling back to simple: {e}"));
            state.strategy = Strategy::Simple;
            self.simple(state, request).await;
        }
    }

    /// Direct template response. Never fails; a failed responder yields an
    /// apology with zero quality.
    async fn simple(&self, state: &mut OrchestrationState, request: &QueryRequest) {
        let generator = Generator::Template(self.responder.clone());
        match self.generate(state, &generator, request, &[]).await {
            Ok(out) => state.answer(out.text, SIMPLE_QUALITY),
            Err(e) => {
                state.error(format!("Responder failed: {e}"));
                state.answer(APOLOGY, 0.0);
            }
        }
    }

    async fn complex(&self, state: &mut OrchestrationState, request: &QueryRequest) -> HlcsResult<()> {
        self.research(state, &request.query, self.config.retrieval_k).await;

        let research = std::mem::take(&mut state.research_results);
        let generator = Generator::Synthesizer(self.synthesizer.clone());
        let result = self.generate(state, &generator, request, &research).await;
        state.research_results = research;

        let out = result?;
        state.answer(out.text, COMPLEX_QUALITY);
        Ok(())
    }

    async fn multimodal(&self, state: &mut OrchestrationState, request: &QueryRequest) -> HlcsResult<()> {
        match &self.media {
            Some(media) => {
                let vision = async {
                    match &request.image_url {
                        Some(url) => {
                            Some(self.timed(VISION_CALL, media.analyze_image(url, &request.query)).await)
                        }
                        None => None,
                    }
                };
                let audio = async {
                    match &request.audio_url {
                        Some(url) => Some(self.timed(AUDIO_CALL, media.transcribe_audio(url)).await),
                        None => None,
                    }
                };
                let (vision, audio) = tokio::join!(vision, audio);

                if let Some((result, record)) = vision {
                    state.record(record);
                    match result {
                        Ok(text) => state.vision_result = Some(text),
                        Err(e) => state.warn(format!("Vision analysis failed: {e}")),
                    }
                }
                if let Some((result, record)) = audio {
                    state.record(record);
                    match result {
                        Ok(text) => state.audio_result = Some(text),
                        Err(e) => state.warn(format!("Audio transcription failed: {e}")),
                    }
                }
            }
            None => state.warn("No media analyzer configured, answering from text only"),
        }

        let combined = format!(
            "{}\n\nImage: {}\nAudio: {}",
            request.query,
            state.vision_result.as_deref().unwrap_or(""),
            state.audio_result.as_deref().unwrap_or("")
        );

        if state.complexity > self.config.multimodal_retrieval_threshold {
            self.research(state, &combined, self.config.multimodal_retrieval_k)
                .await;
        }

        let research = std::mem::take(&mut state.research_results);
        let generation = GenerationRequest::new(&combined)
            .with_research(&research)
            .with_context(request.context.as_ref())
            .with_identity(request.user_id.as_deref(), request.session_id.as_deref());
        let generator = Generator::Synthesizer(self.synthesizer.clone());
        let result = self
            .tracked(state, generator.call_name(), generator.generate(&generation))
            .await;
        state.research_results = research;

        let out = result?;
        state.answer(out.text, MULTIMODAL_QUALITY);
        Ok(())
    }

    async fn agent_workflow(&self, state: &mut OrchestrationState, request: &QueryRequest) -> HlcsResult<()> {
        let agent = self
            .agent
            .clone()
            .ok_or_else(|| HlcsError::invalid("no agent configured"))?;
        let out = self
            .generate(state, &Generator::Agent(agent), request, &[])
            .await?;
        let quality = if out.used_tools_strategy {
            AGENT_TOOLS_QUALITY
        } else {
            AGENT_QUALITY
        };
        state.answer(out.text, quality);
        Ok(())
    }

    /// Agent and retrieval branches run together; either may fail alone.
    async fn ensemble(&self, state: &mut OrchestrationState, request: &QueryRequest) -> HlcsResult<()> {
        let agent = self
            .agent
            .clone()
            .ok_or_else(|| HlcsError::invalid("no agent configured"))?;

        let (agent_branch, retrieval_branch) = tokio::join!(
            self.agent_branch(agent, request),
            self.retrieval_branch(request)
        );

        let mut candidates = Vec::new();
        for (candidate, records, warnings) in [agent_branch, retrieval_branch] {
            state.tool_calls.extend(records);
            for w in warnings {
                state.warn(w);
            }
            if let Some(c) = candidate {
                candidates.push(c);
            }
        }
        debug!(candidates = candidates.len(), "Ensemble branches joined");

        match candidates.len() {
            0 => Err(HlcsError::upstream("ensemble", "no branch produced an answer")),
            1 => {
                let only = candidates.remove(0);
                state.answer(only.answer, only.confidence);
                Ok(())
            }
            _ => {
                let merged = self
                    .tracked(
                        state,
                        MERGE_CALL,
                        self.synthesizer.merge(&candidates, &request.query),
                    )
                    .await;
                match merged {
                    Ok(text) => {
                        state.answer(text, MERGED_QUALITY);
                        state.extra.insert("ensemble_merged".into(), serde_json::json!(true));
                    }
                    Err(e) => {
                        state.warn(format!("Ensemble merge failed, using best candidate: {e}"));
                        let best = candidates
                            .into_iter()
                            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
                        if let Some(best) = best {
                            state.answer(best.answer, best.confidence);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    async fn agent_branch(&self, agent: Arc<dyn AgentRunner>, request: &QueryRequest) -> Branch {
        let generator = Generator::Agent(agent);
        let generation = GenerationRequest::new(&request.query)
            .with_identity(request.user_id.as_deref(), request.session_id.as_deref());
        let (result, record) = self
            .timed(generator.call_name(), generator.generate(&generation))
            .await;

        match result {
            Ok(out) => (
                Some(Candidate {
                    source: "agent".into(),
                    answer: out.text,
                    confidence: AGENT_BRANCH_CONFIDENCE,
                }),
                vec![record],
                Vec::new(),
            ),
            Err(e) => (None, vec![record], vec![format!("Agent branch failed: {e}")]),
        }
    }

    async fn retrieval_branch(&self, request: &QueryRequest) -> Branch {
        let mut records = Vec::new();
        let mut warnings = Vec::new();
        let mut research = Vec::new();

        if let Some(retriever) = &self.retriever {
            let (result, record) = self
                .timed(
                    RETRIEVAL_CALL,
                    retriever.search(&request.query, self.config.retrieval_k),
                )
                .await;
            records.push(record);
            match result {
                Ok(found) => research = found,
                Err(e) => warnings.push(format!("Retrieval branch search failed: {e}")),
            }
        }

        let generator = Generator::Synthesizer(self.synthesizer.clone());
        let generation = GenerationRequest::new(&request.query)
            .with_research(&research)
            .with_context(request.context.as_ref());
        let (result, record) = self
            .timed(generator.call_name(), generator.generate(&generation))
            .await;
        records.push(record);

        match result {
            Ok(out) => (
                Some(Candidate {
                    source: "retrieval".into(),
                    answer: out.text,
                    confidence: RETRIEVAL_BRANCH_CONFIDENCE,
                }),
                records,
                warnings,
            ),
            Err(e) => {
                warnings.push(format!("Retrieval branch synthesis failed: {e}"));
                (None, records, warnings)
            }
        }
    }

    /// Fill `state.research_results`; failures only warn.
    async fn research(&self, state: &mut OrchestrationState, query: &str, k: usize) {
        let Some(retriever) = self.retriever.clone() else {
            debug!("No retriever configured, skipping research");
            return;
        };
        match self.tracked(state, RETRIEVAL_CALL, retriever.search(query, k)).await {
            Ok(found) => {
                state.research_done = true;
                state.research_results = found;
            }
            Err(e) => state.warn(format!("Retrieval failed, continuing without context: {e}")),
        }
    }

    async fn generate(
        &self,
        state: &mut OrchestrationState,
        generator: &Generator,
        request: &QueryRequest,
        research: &[String],
    ) -> HlcsResult<GeneratorOutput> {
        let generation = GenerationRequest::new(&request.query)
            .with_research(research)
            .with_context(request.context.as_ref())
            .with_identity(request.user_id.as_deref(), request.session_id.as_deref());
        self.tracked(state, generator.call_name(), generator.generate(&generation))
            .await
    }
}
