//! Run configuration: per-role LLM settings and the named config registry.
//!
//! Configurations are built in code and looked up by name, so a run is fully
//! described by `(problem, config name, optional step override)`.

use serde::Deserialize;

use crate::prompts;

// Configuration defaults shared by every named config.
pub const DEFAULT_MAX_TOTAL_STEPS: u32 = 256;
pub const DEFAULT_EXPLORATION_ROUNDS: usize = 0;
pub const DEFAULT_EXPLORATION_MAX_QUESTIONS: usize = 3;
pub const DEFAULT_WORKER_NUM_PROVERS: usize = 1;
pub const DEFAULT_WORKER_MAX_VERIFY_ROUNDS: usize = 1;
pub const DEFAULT_WORKER_MAX_PLAN_STEPS: usize = 8;
pub const DEFAULT_WORKER_MAX_DECOMPOSITION_DEPTH: usize = 1;
pub const DEFAULT_VERIFIER_ENSEMBLE_SIZE: usize = 1;
pub const DEFAULT_LLM_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_LLM_TOP_P: f32 = 1.0;

/// Errors produced while resolving or validating a configuration. These are
/// fatal: a run never starts (or continues) with a missing LLM binding.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config '{name}' not found; available: {available}")]
    UnknownConfig { name: String, available: String },

    #[error("{role} role requires an LLM configuration")]
    MissingLlm { role: &'static str },
}

/// Connection and sampling settings for one OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: Option<u32>,
}

impl LlmConfig {
    pub fn new(model: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key_env: api_key_env.into(),
            base_url: None,
            temperature: DEFAULT_LLM_TEMPERATURE,
            top_p: DEFAULT_LLM_TOP_P,
            max_tokens: None,
        }
    }
}

/// Orchestrator parameters.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Sequential exploration rounds before the solve worker is spawned.
    pub exploration_rounds: usize,
    /// Global ceiling on node executions per run.
    pub max_total_steps: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            exploration_rounds: DEFAULT_EXPLORATION_ROUNDS,
            max_total_steps: DEFAULT_MAX_TOTAL_STEPS,
        }
    }
}

/// Exploration agent parameters.
#[derive(Debug, Clone)]
pub struct ExplorationConfig {
    pub max_questions: usize,
    pub llm: Option<LlmConfig>,
    pub system_prompt: String,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_EXPLORATION_MAX_QUESTIONS,
            llm: None,
            system_prompt: prompts::EXPLORATION_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ExplorationConfig {
    /// System prompt with the question cap substituted in.
    pub fn formatted_system_prompt(&self) -> String {
        self.system_prompt
            .replace("{max_questions}", &self.max_questions.to_string())
    }
}

/// Worker agent parameters.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Prover fan-out width per verification round.
    pub num_provers: usize,
    pub max_verify_rounds: usize,
    pub allow_decomposition: bool,
    pub max_plan_steps: usize,
    pub max_decomposition_depth: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_provers: DEFAULT_WORKER_NUM_PROVERS,
            max_verify_rounds: DEFAULT_WORKER_MAX_VERIFY_ROUNDS,
            allow_decomposition: true,
            max_plan_steps: DEFAULT_WORKER_MAX_PLAN_STEPS,
            max_decomposition_depth: DEFAULT_WORKER_MAX_DECOMPOSITION_DEPTH,
        }
    }
}

/// Prover agent parameters.
#[derive(Debug, Clone)]
pub struct ProverConfig {
    pub llm: Option<LlmConfig>,
    pub system_prompt: String,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: prompts::PROVER_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Verifier agent parameters.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Ballots issued per attempt: `min(ensemble_size, llms.len())`.
    pub ensemble_size: usize,
    pub llms: Vec<LlmConfig>,
    pub system_prompt: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            ensemble_size: DEFAULT_VERIFIER_ENSEMBLE_SIZE,
            llms: Vec::new(),
            system_prompt: prompts::VERIFIER_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Parser agent parameters.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub llm: Option<LlmConfig>,
    pub system_prompt: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: prompts::PARSER_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// KB summarizer parameters. The KB stores succinct statements rather than
/// proofs; when an LLM is configured here, draft entries are distilled before
/// insertion.
#[derive(Debug, Clone)]
pub struct KbSummarizerConfig {
    pub llm: Option<LlmConfig>,
    pub system_prompt: String,
}

impl Default for KbSummarizerConfig {
    fn default() -> Self {
        Self {
            llm: None,
            system_prompt: prompts::KB_SUMMARIZER_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub name: String,
    pub orchestrator: OrchestratorConfig,
    pub exploration: ExplorationConfig,
    pub worker: WorkerConfig,
    pub prover: ProverConfig,
    pub verifier: VerifierConfig,
    pub parser: ParserConfig,
    pub kb_summarizer: KbSummarizerConfig,
}

fn openrouter_llm(model: &str, temperature: f32) -> LlmConfig {
    LlmConfig {
        base_url: Some("https://openrouter.ai/api/v1".to_string()),
        temperature,
        ..LlmConfig::new(model, "OPENROUTER_API_KEY")
    }
}

/// The standard OpenRouter-backed configuration.
fn default_config() -> RunConfig {
    let exploration_llm = openrouter_llm("openai/gpt-5.2-pro", 0.7);
    let prover_llm = openrouter_llm("openai/gpt-5.2", 0.4);
    let verifier_llms = vec![openrouter_llm("google/gemini-3-pro-preview", 0.2)];
    let parser_llm = openrouter_llm("openai/gpt-5-mini", 0.0);

    RunConfig {
        name: "default".to_string(),
        orchestrator: OrchestratorConfig {
            exploration_rounds: 2,
            max_total_steps: 128,
        },
        exploration: ExplorationConfig {
            max_questions: 2,
            llm: Some(exploration_llm),
            ..ExplorationConfig::default()
        },
        worker: WorkerConfig {
            num_provers: 2,
            max_verify_rounds: 1,
            allow_decomposition: true,
            ..WorkerConfig::default()
        },
        prover: ProverConfig {
            llm: Some(prover_llm),
            ..ProverConfig::default()
        },
        verifier: VerifierConfig {
            ensemble_size: verifier_llms.len(),
            llms: verifier_llms,
            ..VerifierConfig::default()
        },
        parser: ParserConfig {
            llm: Some(parser_llm.clone()),
            ..ParserConfig::default()
        },
        kb_summarizer: KbSummarizerConfig {
            llm: Some(parser_llm),
            ..KbSummarizerConfig::default()
        },
    }
}

/// Single-prover variant without exploration, for quick smoke runs.
fn direct_config() -> RunConfig {
    let mut config = default_config();
    config.name = "direct".to_string();
    config.orchestrator.exploration_rounds = 0;
    config.worker.num_provers = 1;
    config.worker.allow_decomposition = false;
    config
}

/// Retrieve a configuration by name.
pub fn get_config(name: &str) -> Result<RunConfig, ConfigError> {
    match name {
        "default" => Ok(default_config()),
        "direct" => Ok(direct_config()),
        _ => Err(ConfigError::UnknownConfig {
            name: name.to_string(),
            available: list_configs().join(", "),
        }),
    }
}

/// Names accepted by [`get_config`], sorted.
pub fn list_configs() -> Vec<&'static str> {
    vec!["default", "direct"]
}
