//! [`LlmPolicy`] – the language-model policy adapter.
//!
//! Treats the provider as untrusted.  Every call resolves to a [`Command`]:
//!
//! | Outcome | Command | Exchange record |
//! |---|---|---|
//! | no provider configured | heuristic | `DEMO`, latency 0 |
//! | transport error / timeout | heuristic | `error`, elapsed latency |
//! | empty or missing content | `STOP` default duration | `error` |
//! | no JSON object / bad JSON | `STOP` default duration | `error`, raw text |
//! | out-of-vocabulary command | `STOP` with the proposed duration | `substituted` |
//! | valid reply | the reply | parsed command + duration |
//!
//! Exactly one remote attempt is made per call, bounded by
//! [`LlmPolicyConfig::request_timeout`], and exactly one
//! [`LlmExchangeEntry`] is appended per call.
//!
//! # Reply parsing
//!
//! The reply text is searched for the span from the first `{` to the last
//! `}`; that span must parse as a JSON object.  `command` may be any string
//! (case-insensitive); `duration_ms` may be an integer, a number or a numeric
//! string, and defaults to [`DEFAULT_DURATION_MS`](carbrain_types::DEFAULT_DURATION_MS)
//! when absent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use carbrain_kernel::sanitize;
use carbrain_memory::HistoryStore;
use carbrain_types::{Command, CommandLogEntry, EngineMode, LlmExchangeEntry, SensorSnapshot};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::heuristic;
use crate::llm_driver::{CompletionProvider, CompletionRequest, LlmError};
use crate::prompt;
use crate::system_prompt::SystemPrompt;
use crate::vision::{self, Attachment};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Request parameters for the provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmPolicyConfig {
    pub model: String,
    /// Upper bound on one provider call.
    pub request_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Keep the image data URL in the exchange log.
    pub retain_image_payload: bool,
}

impl Default for LlmPolicyConfig {
    fn default() -> Self {
        Self {
            model: "google/gemini-2.0-flash-exp:free".to_string(),
            request_timeout: Duration::from_millis(5000),
            max_tokens: 100,
            temperature: 0.3,
            retain_image_payload: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Why a reply could not be turned into a proposal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplyError {
    #[error("no JSON object found in reply")]
    NoJsonObject,
    #[error("invalid JSON in reply: {0}")]
    InvalidJson(String),
    #[error("reply JSON is not an object")]
    NotAnObject,
    #[error("duration_ms is not an integer: {0}")]
    BadDuration(String),
}

/// The untrusted proposal extracted from a reply, before enforcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub command: Option<String>,
    pub duration_ms: Option<i64>,
}

/// The span from the first `{` to the last `}`, if there is one.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Extract and decode the proposal carried by `text`.
pub fn parse_reply(text: &str) -> Result<ParsedReply, ReplyError> {
    let json = extract_json_object(text).ok_or(ReplyError::NoJsonObject)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| ReplyError::InvalidJson(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(ReplyError::NotAnObject);
    };

    let command = match map.get("command") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let duration_ms = match map.get("duration_ms") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(number_to_i64(n)),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<i64>()
                .map_err(|_| ReplyError::BadDuration(s.clone()))?,
        ),
        Some(other) => return Err(ReplyError::BadDuration(other.to_string())),
    };

    Ok(ParsedReply {
        command,
        duration_ms,
    })
}

/// Integral view of a JSON number; out-of-range values saturate and are
/// rejected later by the vocabulary guard.
fn number_to_i64(n: &serde_json::Number) -> i64 {
    if let Some(i) = n.as_i64() {
        i
    } else if n.as_u64().is_some() {
        i64::MAX
    } else {
        n.as_f64().map_or(0, |f| f as i64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Provider-backed policy with heuristic fallback.
pub struct LlmPolicy {
    provider: Option<Arc<dyn CompletionProvider>>,
    config: LlmPolicyConfig,
    system_prompt: Arc<SystemPrompt>,
    exchanges: Arc<HistoryStore<LlmExchangeEntry>>,
}

impl LlmPolicy {
    /// `provider = None` puts the adapter in DEMO mode.
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        config: LlmPolicyConfig,
        system_prompt: Arc<SystemPrompt>,
        exchanges: Arc<HistoryStore<LlmExchangeEntry>>,
    ) -> Self {
        Self {
            provider,
            config,
            system_prompt,
            exchanges,
        }
    }

    pub fn mode(&self) -> EngineMode {
        if self.provider.is_some() {
            EngineMode::Llm
        } else {
            EngineMode::Demo
        }
    }

    pub fn config(&self) -> &LlmPolicyConfig {
        &self.config
    }

    /// Decide a command for `snapshot`, recording one exchange.  Never fails.
    pub async fn decide(
        &self,
        snapshot: &SensorSnapshot,
        recent_commands: &[CommandLogEntry],
    ) -> Command {
        let Some(provider) = self.provider.as_deref() else {
            let command = heuristic::decide(snapshot);
            let mut entry = LlmExchangeEntry::new(EngineMode::Demo, snapshot);
            entry.parsed_command = Some(command.kind);
            entry.parsed_duration_ms = Some(command.duration_ms);
            entry.latency_ms = Some(0);
            self.exchanges.append(entry);
            return command;
        };

        let mut entry = LlmExchangeEntry::new(EngineMode::Llm, snapshot);
        let command = self
            .consult(provider, snapshot, recent_commands, &mut entry)
            .await;
        self.exchanges.append(entry);
        command
    }

    async fn consult(
        &self,
        provider: &dyn CompletionProvider,
        snapshot: &SensorSnapshot,
        recent_commands: &[CommandLogEntry],
        entry: &mut LlmExchangeEntry,
    ) -> Command {
        let compiled = prompt::compile(snapshot, recent_commands);
        let attachment = vision::prepare(compiled.image, &self.config.model);
        if let Attachment::Downgraded(reason) = &attachment {
            info!(%reason, "image not attached; sending text-only request");
        }
        let image_data_url = attachment.data_url().map(str::to_string);

        let request = CompletionRequest {
            model: self.config.model.clone(),
            system_prompt: self.system_prompt.render(),
            user_prompt: compiled.text,
            image_data_url,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        entry.system_prompt = Some(request.system_prompt.clone());
        entry.user_prompt = Some(request.user_prompt.clone());
        entry.image_sent = request.image_data_url.is_some();
        if self.config.retain_image_payload {
            entry.image_data_url = request.image_data_url.clone();
        }

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.config.request_timeout, provider.complete(&request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(self.config.request_timeout)),
            };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        entry.latency_ms = Some(latency_ms);

        let completion = match outcome {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, latency_ms, "provider call failed; using heuristic");
                entry.error = Some(e.to_string());
                return heuristic::decide(snapshot);
            }
        };
        entry.token_counts = completion.usage;

        let Some(content) = completion
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
        else {
            warn!(latency_ms, "provider returned empty content; stopping");
            entry.error = Some("provider returned empty content".to_string());
            return Command::stop();
        };

        let parsed = parse_reply(&content);
        entry.raw_response = Some(content);
        match parsed {
            Ok(reply) => {
                let guarded = sanitize(reply.command.as_deref(), reply.duration_ms);
                entry.parsed_command = Some(guarded.command.kind);
                entry.parsed_duration_ms = Some(guarded.command.duration_ms);
                entry.substituted = guarded.substituted;
                guarded.command
            }
            Err(e) => {
                warn!(error = %e, "unparseable provider reply; stopping");
                entry.error = Some(e.to_string());
                Command::stop()
            }
        }
    }
}
