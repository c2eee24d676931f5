//! Call scripting: intake scripts, transcript interpretation, and
//! conversational replies.
//!
//! Every operation has a guaranteed deterministic fallback. Model failures
//! and malformed output are logged and absorbed here; callers only see a
//! result plus its [`ScriptSource`].

pub mod fallback;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calls::{ParsedTranscript, ScriptSource};
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, Role};

/// Name the agent introduces itself with on calls.
pub const AGENT_NAME: &str = "Eden";

const SCRIPT_SYSTEM_PROMPT: &str = "Eden is a placement coordinator calling shelters on behalf of a survivor seeking housing. \
The person answering is the shelter's intake staff; Eden does not work at the shelter. \
Draft a brief outbound call script: Eden introduces herself as calling on behalf of someone who needs shelter, \
asks whether this is the intake line, shares brief context, and asks about availability and requirements. \
Write natural spoken language in 5-8 short lines with no placeholders or brackets. Output plain script text only.";

const TRANSCRIPT_SYSTEM_PROMPT: &str = "Extract structured shelter intake outcomes from a call transcript. \
Return JSON only with keys: availability_status (available|waitlist|unknown), reported_available_beds (number or null), \
intake_requirements (array of strings), needs_human_followup (boolean), summary (string).";

/// Inputs for an intake script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInput {
    pub shelter_name: String,
    pub survivor_context: String,
    pub callback_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    pub text: String,
    pub source: ScriptSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretedTranscript {
    pub parsed: ParsedTranscript,
    pub source: ScriptSource,
}

/// One spoken turn. `Assistant` is the agent, `User` is intake staff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyInput {
    pub shelter_name: String,
    pub survivor_context: String,
    pub callback_number: Option<String>,
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationalReply {
    pub reply: String,
    #[serde(rename = "shouldEndCall", default)]
    pub should_end_call: bool,
}

/// Text-in/text-out scripting with fallbacks.
pub struct ScriptGenerator {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl ScriptGenerator {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    /// Scripts always come from the fallbacks.
    pub fn fallback_only() -> Self {
        Self { llm: None }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    async fn ask(&self, request: CompletionRequest) -> Option<Result<String, LlmError>> {
        let llm = self.llm.as_ref()?;
        Some(llm.complete(request).await.map(|r| r.content))
    }

    pub async fn generate_script(&self, input: &ScriptInput) -> GeneratedScript {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(SCRIPT_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Draft a script for {AGENT_NAME} calling {} on behalf of a survivor. Survivor context: {}. Callback: {}. \
                 Ask about bed availability, waitlist, and intake requirements. Include a brief safety line.",
                input.shelter_name,
                input.survivor_context,
                input.callback_number.as_deref().unwrap_or("none"),
            )),
        ])
        .with_temperature(0.2);

        let fallback = || GeneratedScript {
            text: fallback::fallback_script(input),
            source: ScriptSource::Fallback,
        };

        match self.ask(request).await {
            None => fallback(),
            Some(Ok(raw)) => {
                let text = fallback::sanitize_script(&raw);
                if text.is_empty() {
                    warn!(shelter = %input.shelter_name, "Model script empty after sanitizing; using fallback");
                    fallback()
                } else {
                    GeneratedScript {
                        text,
                        source: ScriptSource::Ai,
                    }
                }
            }
            Some(Err(e)) => {
                warn!(shelter = %input.shelter_name, error = %e, "Script generation failed; using fallback");
                fallback()
            }
        }
    }

    pub async fn parse_transcript(&self, transcript: &str) -> InterpretedTranscript {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(TRANSCRIPT_SYSTEM_PROMPT),
            ChatMessage::user(transcript),
        ])
        .with_temperature(0.2)
        .json();

        let result = match self.ask(request).await {
            None => None,
            Some(Ok(raw)) => match serde_json::from_str::<serde_json::Value>(&fallback::strip_code_fence(&raw)) {
                Ok(value) if value.is_object() => Some(fallback::normalize_parsed(&value)),
                Ok(_) => {
                    warn!("Transcript interpretation was not a JSON object; using fallback");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Transcript interpretation was not valid JSON; using fallback");
                    None
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "Transcript interpretation failed; using fallback");
                None
            }
        };

        match result {
            Some(parsed) => InterpretedTranscript {
                parsed,
                source: ScriptSource::Ai,
            },
            None => InterpretedTranscript {
                parsed: fallback::parse_transcript(transcript),
                source: ScriptSource::Fallback,
            },
        }
    }

    /// Next thing to say after intake staff spoke.
    pub async fn conversational_reply(&self, input: &ReplyInput) -> (ConversationalReply, ScriptSource) {
        let last_speech = input
            .history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str())
            .unwrap_or(fallback::NO_SPEECH);
        let contextual = || (fallback::contextual_reply(last_speech), ScriptSource::Fallback);

        let mut messages = vec![ChatMessage::system(format!(
            "You are {AGENT_NAME}, a placement coordinator. You called {} (not the survivor) to ask about availability \
             on behalf of someone seeking housing. The person on the phone is shelter intake staff. Survivor context: {}. \
             Callback: {}. Reply in 1-3 short conversational sentences that acknowledge specifically what they said. \
             Goal: confirm bed availability, intake requirements, waitlist information, or next steps. \
             Output JSON only with keys: reply (string), shouldEndCall (boolean).",
            input.shelter_name,
            input.survivor_context,
            input.callback_number.as_deref().unwrap_or("none"),
        ))];
        messages.extend(input.history.iter().map(|turn| ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        }));
        let request = CompletionRequest::new(messages).with_temperature(0.2).json();

        match self.ask(request).await {
            None => contextual(),
            Some(Ok(raw)) => match serde_json::from_str::<ConversationalReply>(&fallback::strip_code_fence(&raw)) {
                Ok(reply) if !reply.reply.trim().is_empty() => (
                    ConversationalReply {
                        reply: reply.reply.trim().chars().take(fallback::MAX_REPLY_CHARS).collect(),
                        should_end_call: reply.should_end_call,
                    },
                    ScriptSource::Ai,
                ),
                Ok(_) => contextual(),
                Err(e) => {
                    warn!(error = %e, "Conversational reply was not valid JSON; using fallback");
                    contextual()
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "Conversational reply failed; using fallback");
                contextual()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::Availability;
    use crate::llm::CompletionResponse;
    use async_trait::async_trait;

    /// Returns a canned body, or fails when `None`.
    struct CannedLlm(Option<&'static str>);

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            match self.0 {
                Some(content) => Ok(CompletionResponse {
                    content: content.to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                }),
                None => Err(LlmError::RequestFailed {
                    provider: "canned".into(),
                    reason: "offline".into(),
                }),
            }
        }
    }

    fn generator(body: Option<&'static str>) -> ScriptGenerator {
        ScriptGenerator::new(Some(Arc::new(CannedLlm(body))))
    }

    fn input() -> ScriptInput {
        ScriptInput {
            shelter_name: "Harbor House".into(),
            survivor_context: "one adult".into(),
            callback_number: None,
        }
    }

    #[tokio::test]
    async fn script_without_llm_is_fallback() {
        let script = ScriptGenerator::fallback_only().generate_script(&input()).await;
        assert_eq!(script.source, ScriptSource::Fallback);
        assert!(script.text.contains("Harbor House"));
    }

    #[tokio::test]
    async fn script_from_llm_is_sanitized() {
        let script = generator(Some("Hello, I'm [your name].  Any beds?")).generate_script(&input()).await;
        assert_eq!(script.source, ScriptSource::Ai);
        assert_eq!(script.text, "Hello, I'm Eden. Any beds?");
    }

    #[tokio::test]
    async fn script_llm_failure_or_empty_falls_back() {
        assert_eq!(
            generator(None).generate_script(&input()).await.source,
            ScriptSource::Fallback
        );
        assert_eq!(
            generator(Some("[placeholder]")).generate_script(&input()).await.source,
            ScriptSource::Fallback
        );
    }

    #[tokio::test]
    async fn transcript_from_llm_is_normalized() {
        let result = generator(Some(
            r#"{"availability_status":"available","reported_available_beds":2,"intake_requirements":["ID"],"needs_human_followup":false,"summary":"Two beds."}"#,
        ))
        .parse_transcript("anything")
        .await;
        assert_eq!(result.source, ScriptSource::Ai);
        assert_eq!(result.parsed.availability_status, Availability::Available);
        assert_eq!(result.parsed.reported_available_beds, Some(2));
    }

    #[tokio::test]
    async fn transcript_bad_json_falls_back_to_keywords() {
        let result = generator(Some("not json"))
            .parse_transcript("We are on a waitlist right now")
            .await;
        assert_eq!(result.source, ScriptSource::Fallback);
        assert_eq!(result.parsed.availability_status, Availability::Waitlist);
    }

    #[tokio::test]
    async fn reply_uses_llm_json_or_contextual_fallback() {
        let history = vec![
            ConversationTurn {
                role: Role::Assistant,
                content: "Hi, any beds?".into(),
            },
            ConversationTurn {
                role: Role::User,
                content: "We're full tonight, no beds".into(),
            },
        ];
        let reply_input = ReplyInput {
            shelter_name: "Harbor House".into(),
            survivor_context: "one adult".into(),
            callback_number: None,
            history,
        };

        let (reply, source) = generator(Some("```json\n{\"reply\":\"Understood, thanks.\",\"shouldEndCall\":true}\n```"))
            .conversational_reply(&reply_input)
            .await;
        assert_eq!(source, ScriptSource::Ai);
        assert_eq!(reply.reply, "Understood, thanks.");
        assert!(reply.should_end_call);

        let (reply, source) = generator(None).conversational_reply(&reply_input).await;
        assert_eq!(source, ScriptSource::Fallback);
        assert!(reply.should_end_call);
        assert!(reply.reply.contains("full capacity"));
    }
}
