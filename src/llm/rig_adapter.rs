//! Bridges a rig `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::completion::message::{AssistantContent, Message};
use tracing::debug;

use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};
use crate::error::LlmError;

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else.";

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// Rig takes the system text as a preamble and the final turn as the prompt.
struct RigTurns {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

fn to_rig_message(message: ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content),
        Role::System | Role::User => Message::user(message.content),
    }
}

fn split_turns(messages: Vec<ChatMessage>, json_mode: bool) -> Result<RigTurns, LlmError> {
    let (system, mut turns): (Vec<_>, Vec<_>) =
        messages.into_iter().partition(|m| m.role == Role::System);

    let mut preamble: Vec<String> = system.into_iter().map(|m| m.content).collect();
    if json_mode {
        preamble.push(JSON_ONLY.to_string());
    }

    let last = turns.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: "rig".to_string(),
        reason: "completion request has no user turn".to_string(),
    })?;

    Ok(RigTurns {
        preamble: (!preamble.is_empty()).then(|| preamble.join("\n\n")),
        history: turns.into_iter().map(to_rig_message).collect(),
        prompt: to_rig_message(last),
    })
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let turns = split_turns(request.messages, request.json_mode)?;

        let mut builder = self.model.completion_request(turns.prompt);
        for message in turns.history {
            builder = builder.message(message);
        }
        if let Some(preamble) = turns.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        let input_tokens = u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX);
        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);

        debug!(
            model = %self.model_name,
            input_tokens,
            output_tokens,
            "LLM completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }
}
