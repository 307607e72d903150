//! Deterministic in-process stand-in for the chat endpoint, routing by the
//! system prompt of the calling role.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use prover_swarm::config::RunConfig;
use prover_swarm::llm::{
    AssistantMessage, ChatRequest, ChatResponse, Choice, ClientFactory, FunctionCall, LlmClient,
    LlmError, ToolCall,
};
use prover_swarm::LlmConfig;

/// One observed chat call, for prompt assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub tools_requested: bool,
    pub json_requested: bool,
}

struct RouterInner {
    exploration_prompt: String,
    prover_prompt: String,
    verifier_prompt: String,
    accept: Mutex<bool>,
    history: Mutex<Vec<RecordedCall>>,
}

/// Routes each request by comparing its system prompt against the
/// configuration's role prompts, and answers with canned-but-consistent
/// content a real run would accept.
#[derive(Clone)]
pub struct MockLlmRouter {
    inner: Arc<RouterInner>,
}

impl MockLlmRouter {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                exploration_prompt: config.exploration.formatted_system_prompt(),
                prover_prompt: config.prover.system_prompt.clone(),
                verifier_prompt: config.verifier.system_prompt.clone(),
                accept: Mutex::new(true),
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every subsequent verifier ballot reject.
    pub fn reject_everything(&self) {
        *self.inner.accept.lock().unwrap() = false;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.history.lock().unwrap().clone()
    }
}

impl ClientFactory for MockLlmRouter {
    fn client_for(&self, config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
        Ok(Box::new(MockClient {
            inner: self.inner.clone(),
            model: config.model.clone(),
        }))
    }
}

struct MockClient {
    inner: Arc<RouterInner>,
    model: String,
}

#[async_trait]
impl LlmClient for MockClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        Ok(self.inner.respond(&self.model, &request))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl RouterInner {
    fn respond(&self, model: &str, request: &ChatRequest) -> ChatResponse {
        let system_prompt = request
            .messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let user_prompt = request
            .messages
            .get(1)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.history.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            system_prompt: system_prompt.clone(),
            user_prompt: user_prompt.clone(),
            tools_requested: !request.tools.is_empty(),
            json_requested: request.response_format.is_some(),
        });

        // Structured-output calls (the parser and the KB summarizer) are
        // recognized by shape, not by system prompt.
        if request.response_format.is_some() {
            return text_response(self.structured_reply(&user_prompt));
        }

        if system_prompt == self.exploration_prompt {
            return text_response(
                "- What does the problem state?\n- Which known result applies?".to_string(),
            );
        }
        if system_prompt == self.prover_prompt {
            let problem = capture(&user_prompt, r"(?s)Problem:\s*(.*?)\n\n")
                .unwrap_or_else(|| "the problem".to_string());
            let solution = format!(
                "Output type: Solution\n\nSolution:\nThe problem states: {problem}. \
                 A mock proof verifies the conclusion directly."
            );
            return finish_response(&solution);
        }
        if system_prompt == self.verifier_prompt {
            let reply = if *self.accept.lock().unwrap() {
                "Verdict: Correct\n\nReason:\nMock verifier accepted the proof."
            } else {
                "Verdict: Incorrect\n\nReason:\nMock verifier rejected the proof."
            };
            return text_response(reply.to_string());
        }
        text_response("ok".to_string())
    }

    /// JSON replies keyed off markers in the user prompt: a KB summary, an
    /// exploration question list, or a solution attempt.
    fn structured_reply(&self, user_prompt: &str) -> String {
        let block = capture(user_prompt, r"(?s)```[\w+-]*\n(.*?)\n```").unwrap_or_default();

        if user_prompt.contains("statement_md") {
            let title = block.lines().next().unwrap_or("Mock fact").trim();
            return json!({"title": title, "statement_md": block}).to_string();
        }
        if user_prompt.contains("\"questions\"") {
            let questions: Vec<String> = block
                .lines()
                .filter_map(|line| line.trim().strip_prefix("- "))
                .map(str::to_string)
                .collect();
            let rationales: Vec<String> = questions
                .iter()
                .map(|q| format!("Mock rationale for: {q}"))
                .collect();
            return json!({"questions": questions, "rationales_md": rationales}).to_string();
        }
        if user_prompt.contains("final_answer_md") {
            let outline: Vec<String> = block
                .lines()
                .filter(|line| line.trim().to_lowercase().starts_with("step"))
                .map(|line| line.trim().to_string())
                .collect();
            return json!({
                "final_answer_md": block,
                "outline_steps": outline,
                "kb_updates": [],
                "claims_incorrect_conclusion": false,
            })
            .to_string();
        }
        json!({}).to_string()
    }
}

fn capture(text: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

fn text_response(content: String) -> ChatResponse {
    ChatResponse {
        choices: vec![Choice {
            message: AssistantMessage {
                content: Some(content),
                tool_calls: Vec::new(),
            },
        }],
    }
}

fn finish_response(output_text: &str) -> ChatResponse {
    ChatResponse {
        choices: vec![Choice {
            message: AssistantMessage {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "mock-finish".to_string(),
                    function: FunctionCall {
                        name: "finish".to_string(),
                        arguments: json!({"output_text": output_text}).to_string(),
                    },
                }],
            },
        }],
    }
}
