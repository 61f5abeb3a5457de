//! `carbrain-runtime` – The decision brain
//!
//! Turns sensor snapshots into movement commands, consulting a remote
//! language model when one is configured and falling back to fixed rules
//! whenever it is not, or misbehaves.
//!
//! # Modules
//!
//! - [`decision_engine`] – [`DecisionEngine`][decision_engine::DecisionEngine]:
//!   the single entry point.  Records metrics, runs the anomaly monitor,
//!   persists frames, asks the policy, and logs the command.
//! - [`llm_policy`] – [`LlmPolicy`][llm_policy::LlmPolicy]: the untrusted-reply
//!   adapter.  One bounded provider call per cycle, lenient JSON extraction,
//!   vocabulary enforcement, and a full exchange record for every call.
//! - [`heuristic`] – [`decide`][heuristic::decide]: the deterministic
//!   fallback controller.
//! - [`prompt`] – [`compile`][prompt::compile]: snapshot + recent commands →
//!   decision request text.
//! - [`system_prompt`] – [`SystemPrompt`][system_prompt::SystemPrompt]: the
//!   live, operator-replaceable system instruction, rendered with the JSON
//!   Schema of the expected reply.
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: OpenAI-compatible
//!   chat-completions client behind the
//!   [`CompletionProvider`][llm_driver::CompletionProvider] trait.
//! - [`vision`] – image eligibility and `GRAY8` → PNG data-URL encoding.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with an optional OTLP span exporter.

pub mod decision_engine;
pub mod heuristic;
pub mod llm_driver;
pub mod llm_policy;
pub mod prompt;
pub mod system_prompt;
pub mod telemetry;
pub mod vision;

pub use decision_engine::{DecisionEngine, EngineConfig, EngineStatus, HistoryCapacities};
pub use llm_driver::{Completion, CompletionProvider, CompletionRequest, LlmDriver, LlmError};
pub use llm_policy::{LlmPolicy, LlmPolicyConfig};
pub use system_prompt::{DEFAULT_SYSTEM_PROMPT, SystemPrompt};
pub use telemetry::{TracerProviderGuard, init_tracing};
