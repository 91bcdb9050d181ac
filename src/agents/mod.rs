// src/agents/mod.rs
// The four specialist agents (C4-C7, §4.4-§4.7). Each agent owns its own LLM
// provider handle, prompt builder, and per-agent model config; handoffs
// between agents are plain async calls passed explicit references to the
// next agent (see DESIGN.md "Agent handoff wiring") rather than a stored
// Arc-cycle, with an advisory broadcast publish alongside each handoff so the
// bus's pub/sub half stays observable and testable per §4.1.

pub mod answer;
pub mod classifier;
pub mod clarifier;
pub mod observer;

use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::agents::AgentModelConfig;
use crate::error::MaiceError;
use crate::llm::{ChatResponse, LlmProvider, Message};

pub use answer::AnswerAgent;
pub use classifier::ClassifierAgent;
pub use clarifier::ClarifierAgent;
pub use observer::ObserverAgent;

/// Bounded-retry, exponential-backoff, hard-timeout-per-attempt LLM call
/// (§4.4 step 3, §7 `llm_transient`: "retried silently up to limit; if
/// exhausted, SSE error"). Shared by every non-streaming agent call.
pub async fn call_with_retry(
    llm: &dyn LlmProvider,
    messages: Vec<Message>,
    cfg: &AgentModelConfig,
) -> Result<ChatResponse, MaiceError> {
    let mut attempt = 0u32;
    loop {
        let result = tokio::time::timeout(cfg.timeout(), llm.call(messages.clone(), cfg)).await;
        match result {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(err)) => {
                if attempt >= cfg.max_retries {
                    return Err(err);
                }
                warn!(attempt, model = %cfg.model, "llm call failed, retrying: {err}");
            }
            Err(_) => {
                if attempt >= cfg.max_retries {
                    return Err(MaiceError::Timeout(cfg.timeout()));
                }
                warn!(attempt, model = %cfg.model, "llm call timed out, retrying");
            }
        }
        attempt += 1;
        let backoff_ms = 200u64.saturating_mul(1 << attempt.min(4));
        sleep(Duration::from_millis(backoff_ms)).await;
    }
}
