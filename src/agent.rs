//! Tool-using agent.
//!
//! A bounded decision loop over the registered tools. Each round the model
//! either answers directly or requests tool calls; requested tools run in
//! order, their results are appended to the conversation, and the model
//! decides again.
//!
//! ```text
//!  Idle ──▶ AwaitingToolDecision ──(tool calls)──▶ ExecutingTool ─┐
//!                 ▲     │                                        │
//!                 │     └──(text)──▶ Synthesizing ──▶ Done       │
//!                 └──────────────────────────────────────────────┘
//!  any model/tool error, or more than `max_rounds` tool rounds ──▶ Failed
//! ```
//!
//! The round bound is the only internal safeguard against unbounded
//! latency; callers still wrap the whole run in a timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, SamplingConfig};
use crate::error::{PipelineError, Result};
use crate::llm::{ChatMessage, LanguageModel, ToolCall};
use crate::models::{ToolInvocation, ToolName};
use crate::prompts::{AGENT_SYSTEM, INSUFFICIENT_CONTEXT};
use crate::tools::{query_param, ToolRegistry};

/// Anything that can turn a question into a natural-language answer.
///
/// The issue stage depends on this rather than on [`ToolAgent`] so the
/// grounding step can be stubbed.
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    AwaitingToolDecision,
    ExecutingTool,
    Synthesizing,
    Done,
    Failed,
}

impl AgentState {
    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Idle, AwaitingToolDecision)
                | (AwaitingToolDecision, ExecutingTool)
                | (AwaitingToolDecision, Synthesizing)
                | (ExecutingTool, AwaitingToolDecision)
                | (Synthesizing, Done)
                | (AwaitingToolDecision, Failed)
                | (ExecutingTool, Failed)
        )
    }
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub max_rounds: usize,
    pub tool_timeout: Duration,
    pub sampling: SamplingConfig,
}

impl AgentOptions {
    pub fn from_config(config: &AgentConfig, sampling: SamplingConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            sampling,
        }
    }
}

/// Final answer plus the scratchpad of tool calls that produced it.
#[derive(Debug, Clone)]
pub struct AgentAnswer {
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub rounds: usize,
}

pub struct ToolAgent {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    options: AgentOptions,
}

/// Tracks the current state and rejects illegal transitions.
struct Run {
    state: AgentState,
}

impl Run {
    fn new() -> Self {
        Self {
            state: AgentState::Idle,
        }
    }

    fn advance(&mut self, next: AgentState) {
        debug_assert!(
            self.state.allows(next),
            "illegal agent transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(target: "agent", from = ?self.state, to = ?next, "transition");
        self.state = next;
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        self.advance(AgentState::Failed);
        err
    }
}

impl ToolAgent {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, options: AgentOptions) -> Self {
        Self {
            model,
            tools,
            options,
        }
    }

    #[tracing::instrument(name = "agent.run", skip(self), fields(model = self.model.model_name()))]
    pub async fn run(&self, question: &str) -> Result<AgentAnswer> {
        let specs = self.tools.specs();
        let mut messages = vec![
            ChatMessage::System(AGENT_SYSTEM.to_string()),
            ChatMessage::User(question.to_string()),
        ];
        let mut invocations = Vec::new();
        let mut rounds = 0usize;
        let mut run = Run::new();

        run.advance(AgentState::AwaitingToolDecision);

        loop {
            let turn = self
                .model
                .chat(&messages, &specs, self.options.sampling)
                .await
                .map_err(|e| run.fail(PipelineError::upstream("language model", e)))?;

            if turn.tool_calls.is_empty() {
                run.advance(AgentState::Synthesizing);
                let text = match turn.content {
                    Some(text) if !text.trim().is_empty() => text,
                    _ => {
                        warn!(target: "agent", rounds, "model returned an empty final answer");
                        INSUFFICIENT_CONTEXT.to_string()
                    }
                };
                run.advance(AgentState::Done);
                info!(target: "agent", rounds, tool_calls = invocations.len(), "answered");
                return Ok(AgentAnswer {
                    text,
                    invocations,
                    rounds,
                });
            }

            if rounds >= self.options.max_rounds {
                warn!(target: "agent", max_rounds = self.options.max_rounds, "round limit reached");
                return Err(run.fail(PipelineError::tool(
                    "agent",
                    format!(
                        "exceeded {} tool rounds without a final answer",
                        self.options.max_rounds
                    ),
                )));
            }
            rounds += 1;
            run.advance(AgentState::ExecutingTool);

            let calls = turn.tool_calls.clone();
            messages.push(ChatMessage::Assistant(turn));

            for call in &calls {
                let invocation = self.execute(call).await.map_err(|e| run.fail(e))?;
                messages.push(ChatMessage::Tool {
                    call_id: call.id.clone(),
                    content: invocation.result.clone(),
                });
                invocations.push(invocation);
            }

            run.advance(AgentState::AwaitingToolDecision);
        }
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolInvocation> {
        let (Some(kind), Some(tool)) = (ToolName::parse(&call.name), self.tools.find(&call.name))
        else {
            return Err(PipelineError::tool(&call.name, "unknown tool"));
        };
        let query = query_param(&call.arguments).map_err(|e| PipelineError::tool(&call.name, e))?;

        debug!(target: "agent", tool = %call.name, query = %query, "executing tool");

        let result = match tokio::time::timeout(
            self.options.tool_timeout,
            tool.execute(call.arguments.clone()),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(PipelineError::tool(&call.name, format!("{:#}", e))),
            Err(_) => {
                return Err(PipelineError::tool(
                    &call.name,
                    format!("timed out after {:?}", self.options.tool_timeout),
                ))
            }
        };

        Ok(ToolInvocation {
            tool: kind,
            query,
            result,
        })
    }
}

#[async_trait]
impl QuestionAnswerer for ToolAgent {
    async fn answer(&self, question: &str) -> Result<String> {
        Ok(self.run(question).await?.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{AssistantMessage, ToolSpec};
    use crate::tools::WebSearchTool;
    use crate::web_search::{WebResult, WebSearchProvider};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Model stub that replays scripted turns, repeating the last one.
    struct ScriptedModel {
        turns: Vec<AssistantMessage>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(turns: Vec<AssistantMessage>) -> Arc<Self> {
            Arc::new(Self {
                turns,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolSpec],
            _sampling: SamplingConfig,
        ) -> anyhow::Result<AssistantMessage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            let idx = n.min(self.turns.len() - 1);
            Ok(self.turns[idx].clone())
        }
    }

    struct CountingSearch {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingSearch {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl WebSearchProvider for CountingSearch {
        async fn search(&self, query: &str, _max_results: usize) -> anyhow::Result<Vec<WebResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("provider returned 503");
            }
            Ok(vec![WebResult {
                title: "trend".into(),
                url: String::new(),
                content: format!("about {query}"),
            }])
        }
    }

    fn web_call(id: &str, query: &str) -> AssistantMessage {
        AssistantMessage {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: "web_search".into(),
                arguments: json!({ "query": query }),
            }],
        }
    }

    /// Provider that never answers within any reasonable tool budget.
    struct StalledSearch;

    #[async_trait]
    impl WebSearchProvider for StalledSearch {
        async fn search(&self, _query: &str, _max_results: usize) -> anyhow::Result<Vec<WebResult>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn agent(model: Arc<dyn LanguageModel>, search: Arc<dyn WebSearchProvider>, max_rounds: usize) -> ToolAgent {
        agent_with_timeout(model, search, max_rounds, Duration::from_secs(5))
    }

    fn agent_with_timeout(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn WebSearchProvider>,
        max_rounds: usize,
        tool_timeout: Duration,
    ) -> ToolAgent {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(WebSearchTool::new(search, 3)));
        ToolAgent::new(
            model,
            tools,
            AgentOptions {
                max_rounds,
                tool_timeout,
                sampling: SamplingConfig {
                    temperature: 0.0,
                    max_tokens: 512,
                },
            },
        )
    }

    #[test]
    fn test_state_transitions() {
        use AgentState::*;
        assert!(Idle.allows(AwaitingToolDecision));
        assert!(AwaitingToolDecision.allows(ExecutingTool));
        assert!(ExecutingTool.allows(AwaitingToolDecision));
        assert!(Synthesizing.allows(Done));
        assert!(!Idle.allows(Done));
        assert!(!Done.allows(AwaitingToolDecision));
        assert!(!Failed.allows(Idle));
        assert!(!Synthesizing.allows(ExecutingTool));
    }

    #[tokio::test]
    async fn test_direct_answer_uses_no_tools() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("바로 답변")]);
        let search = CountingSearch::new(false);
        let a = agent(model.clone(), search.clone(), 10);

        let out = a.run("안녕?").await.unwrap();
        assert_eq!(out.text, "바로 답변");
        assert_eq!(out.rounds, 0);
        assert!(out.invocations.is_empty());
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let model = ScriptedModel::new(vec![
            web_call("c1", "CRM 트렌드"),
            AssistantMessage::text("개인화가 핵심입니다"),
        ]);
        let search = CountingSearch::new(false);
        let a = agent(model.clone(), search.clone(), 10);

        let out = a.run("최신 CRM 트렌드?").await.unwrap();
        assert_eq!(out.text, "개인화가 핵심입니다");
        assert_eq!(out.rounds, 1);
        assert_eq!(out.invocations.len(), 1);
        assert_eq!(out.invocations[0].tool, ToolName::WebSearch);
        assert_eq!(out.invocations[0].query, "CRM 트렌드");
        assert_eq!(out.invocations[0].result, "trend – about CRM 트렌드");

        // Second decision sees the tool result.
        let seen = model.seen.lock().unwrap();
        assert!(matches!(
            seen[1].last(),
            Some(ChatMessage::Tool { call_id, .. }) if call_id == "c1"
        ));
    }

    #[tokio::test]
    async fn test_endless_tool_requests_hit_round_bound() {
        let model = ScriptedModel::new(vec![web_call("loop", "again")]);
        let search = CountingSearch::new(false);
        let a = agent(model.clone(), search.clone(), 3);

        let err = a.run("q").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolExecutionFailure { ref tool, .. } if tool == "agent"
        ));
        assert_eq!(search.calls.load(Ordering::SeqCst), 3);
        assert_eq!(model.calls(), 4);
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let model = ScriptedModel::new(vec![AssistantMessage {
            content: None,
            tool_calls: vec![ToolCall {
                id: "x".into(),
                name: "calculator".into(),
                arguments: json!({ "query": "1+1" }),
            }],
        }]);
        let a = agent(model, CountingSearch::new(false), 10);

        let err = a.run("q").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolExecutionFailure { ref tool, .. } if tool == "calculator"
        ));
    }

    #[tokio::test]
    async fn test_tool_error_is_tool_failure() {
        let model = ScriptedModel::new(vec![web_call("c1", "q")]);
        let a = agent(model, CountingSearch::new(true), 10);

        let err = a.run("q").await.unwrap_err();
        match err {
            PipelineError::ToolExecutionFailure { tool, message } => {
                assert_eq!(tool, "web_search");
                assert!(message.contains("503"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_tool_times_out() {
        let model = ScriptedModel::new(vec![web_call("c1", "q")]);
        let a = agent_with_timeout(model.clone(), Arc::new(StalledSearch), 10, Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = a.run("q").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            PipelineError::ToolExecutionFailure { tool, message } => {
                assert_eq!(tool, "web_search");
                assert!(message.contains("timed out"), "got: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // No second decision after the failed round.
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_final_turn_yields_marker() {
        for content in [None, Some(String::new()), Some("  \n".to_string())] {
            let model = ScriptedModel::new(vec![AssistantMessage {
                content,
                tool_calls: Vec::new(),
            }]);
            let a = agent(model, CountingSearch::new(false), 10);

            let out = a.run("q").await.unwrap();
            assert_eq!(out.text, INSUFFICIENT_CONTEXT);
        }
    }

    #[tokio::test]
    async fn test_answerer_returns_text() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("ok")]);
        let a = agent(model, CountingSearch::new(false), 10);
        assert_eq!(a.answer("q").await.unwrap(), "ok");
    }
}
