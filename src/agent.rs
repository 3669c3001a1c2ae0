//! Local reasoning agent.
//!
//! [`ReactAgent`] answers on its own using a language model and, for
//! harder queries, a Thought / Action / Observation loop over a knowledge
//! search tool. It plugs into the orchestrator as an [`AgentRunner`].
//!
//! ```text
//! query ──▶ choose_strategy ──▶ Simple:  search(3) → prompt → LLM
//!                           └─▶ Complex: ReAct loop (≤ max_steps)
//!                                          │ no final answer / error
//!                                          └──▶ Simple
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::episodic::EpisodicBuffer;
use crate::error::{HlcsError, HlcsResult};
use crate::services::{AgentOutcome, AgentRunner, ContextRetriever, LanguageModel};

/// The single tool the ReAct loop can call.
pub const SEARCH_TOOL: &str = "search_knowledge";

const FINAL_MARKER: &str = "Final Answer:";
const OBSERVATION_MARKER: &str = "\nObservation:";

static ACTION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Action:[ \t]*([A-Za-z_][\w.]*)[ \t]*(?:\(([^)\n]*)\))?").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStrategy {
    Simple,
    Complex,
}

impl AgentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStrategy::Simple => "simple",
            AgentStrategy::Complex => "complex",
        }
    }
}

/// Agent tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Reasoning steps before the ReAct loop gives up.
    pub max_steps: usize,
    /// Snippets retrieved by the simple strategy and by each tool call.
    pub snippets: usize,
    /// Queries longer than this many words use the complex strategy.
    pub complex_word_threshold: usize,
    pub complex_keywords: Vec<String>,
    pub tool_words: Vec<String>,
    /// Observations are cut to this many characters.
    pub observation_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            snippets: 3,
            complex_word_threshold: 30,
            complex_keywords: [
                "analyze", "compare", "design", "implement", "debug", "optimize", "refactor",
                "architecture", "plan", "step by step",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            tool_words: ["search", "find", "look up", "lookup", "code", "calculate"]
                .into_iter()
                .map(String::from)
                .collect(),
            observation_chars: 500,
        }
    }
}

/// Running counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub total_queries: u64,
    pub simple_queries: u64,
    pub complex_queries: u64,
    /// Complex runs that ended in the simple strategy.
    pub fallbacks: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
}

impl AgentStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_queries as f64
        }
    }
}

pub struct ReactAgent {
    llm: Arc<dyn LanguageModel>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    buffer: Option<Arc<EpisodicBuffer>>,
    config: AgentConfig,
    stats: Mutex<AgentStats>,
}

impl ReactAgent {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            retriever: None,
            buffer: None,
            config: AgentConfig::default(),
            stats: Mutex::new(AgentStats::default()),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Record every answered turn in `buffer`.
    pub fn with_buffer(mut self, buffer: Arc<EpisodicBuffer>) -> Self {
        self.buffer = Some(buffer);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn stats(&self) -> AgentStats {
        self.stats.lock().await.clone()
    }

    pub fn choose_strategy(&self, query: &str) -> AgentStrategy {
        let lower = query.to_lowercase();
        let words = lower.split_whitespace().count();

        let complex = self.config.complex_keywords.iter().any(|k| lower.contains(k.as_str()))
            || words > self.config.complex_word_threshold
            || self.config.tool_words.iter().any(|k| lower.contains(k.as_str()));

        if complex {
            AgentStrategy::Complex
        } else {
            AgentStrategy::Simple
        }
    }

    /// Answer `query`, optionally pinning the strategy.
    pub async fn run_with(
        &self,
        query: &str,
        force_strategy: Option<AgentStrategy>,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> HlcsResult<AgentOutcome> {
        if query.trim().is_empty() {
            return Err(HlcsError::invalid("query must not be empty"));
        }

        let started = Instant::now();
        let strategy = force_strategy.unwrap_or_else(|| self.choose_strategy(query));
        debug!(strategy = strategy.as_str(), "Agent strategy chosen");

        let mut fell_back = false;
        let result = match strategy {
            AgentStrategy::Simple => self.simple(query).await.map(|a| (a, 1, false)),
            AgentStrategy::Complex => match self.react(query).await {
                Ok(Some((answer, steps))) => Ok((answer, steps, true)),
                Ok(None) => {
                    fell_back = true;
                    self.simple(query).await.map(|a| (a, self.config.max_steps, false))
                }
                Err(e) => {
                    warn!(error = %e, "ReAct loop failed, using simple strategy");
                    fell_back = true;
                    self.simple(query).await.map(|a| (a, 1, false))
                }
            },
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        {
            let mut stats = self.stats.lock().await;
            stats.total_queries += 1;
            stats.total_latency_ms += latency_ms;
            match strategy {
                AgentStrategy::Simple => stats.simple_queries += 1,
                AgentStrategy::Complex => stats.complex_queries += 1,
            }
            if fell_back {
                stats.fallbacks += 1;
            }
            if result.is_err() {
                stats.failures += 1;
            }
        }

        let (answer, steps, used_tools_strategy) = result?;
        info!(
            strategy = strategy.as_str(),
            steps, latency_ms, "Agent answered"
        );

        if let Some(buffer) = &self.buffer {
            let mut metadata = BTreeMap::new();
            metadata.insert("agent_strategy".to_string(), json!(strategy.as_str()));
            metadata.insert("latency_ms".to_string(), json!(latency_ms));
            buffer
                .add(query, answer.as_str(), session_id, user_id, Some(metadata))
                .await;
        }

        Ok(AgentOutcome {
            answer,
            used_tools_strategy,
            steps,
            latency_ms,
        })
    }

    async fn lookup(&self, query: &str) -> Vec<String> {
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };
        match retriever.search(query, self.config.snippets).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Agent retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    async fn simple(&self, query: &str) -> HlcsResult<String> {
        let snippets = self.lookup(query).await;
        let mut prompt = String::new();
        if !snippets.is_empty() {
            prompt.push_str("Context:\n");
            for s in &snippets {
                prompt.push_str("- ");
                prompt.push_str(s);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("Question: {query}\nAnswer:"));

        let answer = self.llm.generate(&prompt).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(HlcsError::upstream(self.llm.name(), "empty completion"));
        }
        Ok(answer.to_string())
    }

    /// `Ok(None)` when the loop ends without a final answer.
    async fn react(&self, query: &str) -> HlcsResult<Option<(String, usize)>> {
        let mut transcript = initial_prompt(query);

        for step in 1..=self.config.max_steps {
            let raw = self.llm.generate(&transcript).await?;
            // The model must not write its own observations.
            let turn = match raw.find(OBSERVATION_MARKER) {
                Some(cut) => &raw[..cut],
                None => raw.as_str(),
            };
            transcript.push_str(turn);

            if let Some(pos) = turn.rfind(FINAL_MARKER) {
                let answer = turn[pos + FINAL_MARKER.len()..].trim();
                if !answer.is_empty() {
                    debug!(step, "ReAct reached a final answer");
                    return Ok(Some((answer.to_string(), step)));
                }
            }

            if let Some((tool, argument)) = parse_action(turn) {
                if tool != SEARCH_TOOL {
                    warn!(tool = %tool, "Unknown tool requested, stopping");
                    return Ok(None);
                }
                let found = self.lookup(&argument).await;
                let observation: String = serde_json::to_string(&found)?
                    .chars()
                    .take(self.config.observation_chars)
                    .collect();
                transcript.push_str(&format!("{OBSERVATION_MARKER} {observation}\n"));
            }
        }

        warn!(max_steps = self.config.max_steps, "ReAct loop exhausted");
        Ok(None)
    }
}

#[async_trait]
impl AgentRunner for ReactAgent {
    async fn run(
        &self,
        query: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) -> HlcsResult<AgentOutcome> {
        self.run_with(query, None, user_id, session_id).await
    }

    fn name(&self) -> &str {
        "react_agent"
    }
}

fn initial_prompt(task: &str) -> String {
    format!(
        "Task: {task}\n\n\
         You have access to these tools:\n{SEARCH_TOOL}\n\n\
         Think step by step and use tools as needed.\n\n\
         Format:\n\
         Thought: (your reasoning)\n\
         Action: tool_name(argument)\n\
         Observation: (tool result)\n\
         ... (repeat as needed)\n\
         Final Answer: (your final answer)\n\n"
    )
}

/// `"Action: search_knowledge(jwt auth)"` → `("search_knowledge", "jwt auth")`.
fn parse_action(turn: &str) -> Option<(String, String)> {
    let caps = ACTION_RE.as_ref()?.captures(turn)?;
    let tool = caps.get(1)?.as_str().to_string();
    let argument = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((tool, argument))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Script(Mutex<VecDeque<String>>);

    impl Script {
        fn new(turns: &[&str]) -> Self {
            Self(Mutex::new(turns.iter().map(|s| s.to_string()).collect()))
        }
    }

    #[async_trait]
    impl LanguageModel for Script {
        async fn generate(&self, _prompt: &str) -> HlcsResult<String> {
            self.0
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| HlcsError::upstream("script", "exhausted"))
        }
    }

    struct Fixed;

    #[async_trait]
    impl ContextRetriever for Fixed {
        async fn search(&self, query: &str, _k: usize) -> HlcsResult<Vec<String>> {
            Ok(vec![format!("fact about {query}")])
        }
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(
            parse_action("Thought: hm\nAction: search_knowledge(jwt auth)\n"),
            Some(("search_knowledge".into(), "jwt auth".into()))
        );
        assert_eq!(parse_action("Action: wait"), Some(("wait".into(), String::new())));
        assert_eq!(parse_action("Thought: only thinking"), None);
    }

    #[test]
    fn test_strategy_choice() {
        let agent = ReactAgent::new(Arc::new(Script::new(&[])));
        assert_eq!(agent.choose_strategy("hello there"), AgentStrategy::Simple);
        assert_eq!(agent.choose_strategy("please debug this"), AgentStrategy::Complex);
        assert_eq!(agent.choose_strategy(&"word ".repeat(31)), AgentStrategy::Complex);
    }

    #[tokio::test]
    async fn test_react_uses_tool_then_answers() {
        let llm = Script::new(&[
            "Thought: need facts\nAction: search_knowledge(rust)\nObservation: invented",
            "Thought: got it\nFinal Answer: Rust is a language.",
        ]);
        let agent = ReactAgent::new(Arc::new(llm)).with_retriever(Arc::new(Fixed));

        let out = agent
            .run_with("explain", Some(AgentStrategy::Complex), None, None)
            .await
            .unwrap();
        assert_eq!(out.answer, "Rust is a language.");
        assert!(out.used_tools_strategy);
        assert_eq!(out.steps, 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_falls_back_to_simple() {
        let llm = Script::new(&["Action: rm_rf(/)", "plain answer"]);
        let agent = ReactAgent::new(Arc::new(llm));

        let out = agent
            .run_with("q", Some(AgentStrategy::Complex), None, None)
            .await
            .unwrap();
        assert_eq!(out.answer, "plain answer");
        assert!(!out.used_tools_strategy);

        let stats = agent.stats().await;
        assert_eq!(stats.complex_queries, 1);
        assert_eq!(stats.fallbacks, 1);
    }

    #[tokio::test]
    async fn test_failure_counted() {
        let agent = ReactAgent::new(Arc::new(Script::new(&[])));
        assert!(agent.run("hi", None, None).await.is_err());
        assert_eq!(agent.stats().await.failures, 1);
    }

    #[tokio::test]
    async fn test_turn_recorded_in_buffer() {
        use crate::config::BufferConfig;

        let buffer = Arc::new(EpisodicBuffer::new(BufferConfig::default()));
        let agent = ReactAgent::new(Arc::new(Script::new(&["hi back"])))
            .with_buffer(buffer.clone());

        agent.run("hi", Some("u1"), Some("s1")).await.unwrap();
        let recent = buffer.get_recent(1).await;
        assert_eq!(recent[0].answer, "hi back");
        assert_eq!(recent[0].user_id.as_deref(), Some("u1"));
        assert_eq!(recent[0].session_id.as_deref(), Some("s1"));
    }
}
