//! Deterministic, table-driven fallbacks and output normalization.
//!
//! Everything here is pure and total: no I/O, no errors.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{ConversationalReply, ScriptInput, AGENT_NAME};
use crate::calls::{Availability, ParsedTranscript};

pub const MAX_SCRIPT_CHARS: usize = 1400;
pub const MAX_SUMMARY_CHARS: usize = 500;
pub const MAX_REPLY_CHARS: usize = 500;
pub const MAX_REQUIREMENTS: usize = 10;

/// What a speech gather reports when the caller said nothing.
pub const NO_SPEECH: &str = "(no speech detected)";

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect(concat!(stringify!($name), " compiles")));
    };
}

pattern!(NAME_PLACEHOLDER, r"(?i)\[(?:your|my)\s+name\]");
pattern!(BRACKET_PLACEHOLDER, r"\[[^\]]+\]");
pattern!(BRACE_PLACEHOLDER, r"\{\{[^}]+\}\}");
pattern!(WHITESPACE_RUN, r"\s{2,}");
pattern!(CODE_FENCE_OPEN, r"(?i)^```(?:json)?\s*");
pattern!(CODE_FENCE_CLOSE, r"\s*```$");

pattern!(AVAILABLE, r"beds? available|have availability|can take today|can accept today");
pattern!(WAITLIST, r"waitlist|no beds|full capacity|check back");
pattern!(BED_COUNT, r"(\d+)\s+(?:beds?|slots?)\s+(?:available|open)");
pattern!(REQ_ID, r"\b(?:id|identification)\b");
pattern!(REQ_PAPERWORK, r"intake form|paperwork");
pattern!(REQ_CALLBACK, r"call back|callback");
pattern!(REQ_CHILDREN, r"children");
pattern!(URGENT, r"immediate danger|urgent|crisis|supervisor|manager|law enforcement");

pattern!(
    REPLY_FULL,
    r"full capacity|no beds|no availability|nothing available|all full|we're full|at capacity|no room"
);
pattern!(REPLY_WAITLIST, r"waitlist|wait list|wait-list");
pattern!(REPLY_AVAILABLE, r"available|have beds|can take|yes we have|we have \d+|couple of beds");
pattern!(REPLY_HOLD, r"hold on|one moment|let me check|give me a sec");
pattern!(REPLY_GREETING, r"(?:who is this|who are you|hello|hi|yes|yeah)\s*\.?$");

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// The script used whenever no model output is usable.
pub fn fallback_script(input: &ScriptInput) -> String {
    let callback_line = match &input.callback_number {
        Some(number) => format!("If disconnected, please return the call at {number}."),
        None => "If disconnected, we can call back through official shelter channels.".to_string(),
    };
    [
        format!(
            "Hi, I'm {AGENT_NAME}. I'm calling on behalf of someone who needs emergency shelter. Is this the intake line for {}?",
            input.shelter_name
        ),
        format!(
            "I'm reaching out from a placement coordination service. We have a person seeking safe housing. Brief context: {}",
            input.survivor_context
        ),
        "Can you tell me: do you have any beds available tonight?".to_string(),
        "If not, is there a waitlist or a good time for us to call back?".to_string(),
        "What intake requirements should we have ready before they arrive?".to_string(),
        callback_line,
        "Thank you. For immediate danger, people are directed to 911.".to_string(),
    ]
    .join("\n")
}

/// Clean model output: fill the agent name, drop placeholders, collapse
/// whitespace, cap length. May return an empty string.
pub fn sanitize_script(raw: &str) -> String {
    let text = NAME_PLACEHOLDER.replace_all(raw, AGENT_NAME);
    let text = BRACKET_PLACEHOLDER.replace_all(&text, "");
    let text = BRACE_PLACEHOLDER.replace_all(&text, "");
    let text = WHITESPACE_RUN.replace_all(&text, " ");
    truncate_chars(text.trim(), MAX_SCRIPT_CHARS)
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> String {
    let text = CODE_FENCE_OPEN.replace(raw.trim(), "");
    CODE_FENCE_CLOSE.replace(&text, "").trim().to_string()
}

/// Loose truthiness for model-supplied flags.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

/// Coerce model JSON into a well-formed outcome, defaulting anything malformed.
pub fn normalize_parsed(value: &Value) -> ParsedTranscript {
    let availability_status = match value.get("availability_status").and_then(Value::as_str) {
        Some("available") => Availability::Available,
        Some("waitlist") => Availability::Waitlist,
        _ => Availability::Unknown,
    };

    let reported_available_beds = value
        .get("reported_available_beds")
        .and_then(Value::as_f64)
        .filter(|n| *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32);

    let intake_requirements = value
        .get("intake_requirements")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .take(MAX_REQUIREMENTS)
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let needs_human_followup = value.get("needs_human_followup").is_some_and(truthy);

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("No structured summary available.");

    ParsedTranscript {
        availability_status,
        reported_available_beds,
        intake_requirements,
        needs_human_followup,
        summary: truncate_chars(summary, MAX_SUMMARY_CHARS),
    }
}

/// Keyword interpretation of a transcript.
pub fn parse_transcript(transcript: &str) -> ParsedTranscript {
    let t = transcript.to_lowercase();

    let availability_status = if AVAILABLE.is_match(&t) {
        Availability::Available
    } else if WAITLIST.is_match(&t) {
        Availability::Waitlist
    } else {
        Availability::Unknown
    };

    let reported_available_beds = BED_COUNT
        .captures(&t)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    let intake_requirements = [
        (&*REQ_ID, "ID required"),
        (&*REQ_PAPERWORK, "Intake paperwork required"),
        (&*REQ_CALLBACK, "Requested callback"),
        (&*REQ_CHILDREN, "Discussed child placement"),
    ]
    .iter()
    .filter(|(re, _)| re.is_match(&t))
    .map(|(_, label)| label.to_string())
    .collect();

    let needs_human_followup =
        URGENT.is_match(&t) || availability_status == Availability::Waitlist;

    let summary = match availability_status {
        Availability::Available => "Shelter indicated availability; confirm requirements and transport.",
        Availability::Waitlist => "Shelter reported no immediate beds; follow-up required.",
        Availability::Unknown => "Availability unclear from transcript; human review recommended.",
    };

    ParsedTranscript {
        availability_status,
        reported_available_beds,
        intake_requirements,
        needs_human_followup,
        summary: summary.to_string(),
    }
}

fn reply(text: &str, end_call: bool) -> ConversationalReply {
    ConversationalReply {
        reply: text.to_string(),
        should_end_call: end_call,
    }
}

/// Pick a reply from what intake staff just said. First matching row wins.
pub fn contextual_reply(speech: &str) -> ConversationalReply {
    let t = speech.trim().to_lowercase();
    if t.is_empty() || t == NO_SPEECH {
        return reply(
            "I didn't quite catch that. Could you repeat? Do you have any beds available tonight?",
            false,
        );
    }
    if REPLY_FULL.is_match(&t) {
        return reply(
            "I understand you're at full capacity. Thank you for letting us know. We'll look for other options. Goodbye.",
            true,
        );
    }
    if REPLY_WAITLIST.is_match(&t) {
        return reply(
            "Thanks, I'll note the waitlist. We'll follow up on next steps. Goodbye.",
            true,
        );
    }
    if REPLY_AVAILABLE.is_match(&t) {
        return reply(
            "Great, thank you. What are the intake requirements we should prepare? I'll share that with the caller.",
            false,
        );
    }
    if REPLY_HOLD.is_match(&t) {
        return reply("Sure, take your time. I'll hold.", false);
    }
    if REPLY_GREETING.is_match(&t) || t.chars().count() < 5 {
        return reply(
            &format!(
                "This is {AGENT_NAME} calling on behalf of someone who needs shelter. I'm reaching out to see if you have any beds available tonight. Could you let me know?"
            ),
            false,
        );
    }
    reply(
        "Got it. Could you tell me more about availability or intake requirements? Or if you're full, I can look elsewhere.",
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_fills_name_and_drops_placeholders() {
        let raw = "Hi, this is [Your Name]   from {{org}} calling [shelter].\n\n\nThanks.";
        assert_eq!(sanitize_script(raw), "Hi, this is Eden from calling . Thanks.");
        assert_eq!(sanitize_script("[only a placeholder]"), "");
        assert_eq!(sanitize_script(&"a".repeat(2000)).len(), MAX_SCRIPT_CHARS);
    }

    #[test]
    fn fallback_script_mentions_callback() {
        let input = ScriptInput {
            shelter_name: "Harbor House".into(),
            survivor_context: "one adult".into(),
            callback_number: Some("+14155550199".into()),
        };
        let script = fallback_script(&input);
        assert!(script.contains("intake line for Harbor House?"));
        assert!(script.contains("return the call at +14155550199"));
        assert_eq!(script.lines().count(), 7);
    }

    #[test]
    fn keyword_parse_available_with_beds() {
        let parsed = parse_transcript(
            "Yes we have 3 beds available tonight. Bring ID and the intake form. Children are welcome.",
        );
        assert_eq!(parsed.availability_status, Availability::Available);
        assert_eq!(parsed.reported_available_beds, Some(3));
        assert_eq!(
            parsed.intake_requirements,
            vec!["ID required", "Intake paperwork required", "Discussed child placement"]
        );
        assert!(!parsed.needs_human_followup);
    }

    #[test]
    fn keyword_parse_waitlist_needs_followup() {
        let parsed = parse_transcript("We're at full capacity, please check back Monday.");
        assert_eq!(parsed.availability_status, Availability::Waitlist);
        assert!(parsed.needs_human_followup);
        assert!(parsed.intake_requirements.is_empty());
    }

    #[test]
    fn keyword_parse_id_needs_word_boundary() {
        let parsed = parse_transcript("She said they provide meals.");
        assert!(parsed.intake_requirements.is_empty());
        assert_eq!(parsed.availability_status, Availability::Unknown);
    }

    #[test]
    fn normalize_defaults_malformed_fields() {
        let parsed = normalize_parsed(&json!({
            "availability_status": "maybe",
            "reported_available_beds": "two",
            "intake_requirements": ["ID", 5, "a", "b", "c", "d", "e", "f", "g", "h", "i"],
            "needs_human_followup": "yes",
        }));
        assert_eq!(parsed.availability_status, Availability::Unknown);
        assert_eq!(parsed.reported_available_beds, None);
        assert_eq!(parsed.intake_requirements.len(), MAX_REQUIREMENTS);
        assert_eq!(parsed.intake_requirements[1], "5");
        assert!(parsed.needs_human_followup);
        assert_eq!(parsed.summary, "No structured summary available.");
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn contextual_reply_table() {
        assert!(contextual_reply("Sorry, we're full tonight, no beds").should_end_call);
        assert!(contextual_reply("We can put her on the wait list").should_end_call);
        assert!(contextual_reply("We have 2 open").reply.starts_with("Great"));
        assert!(contextual_reply("Hold on, let me check").reply.contains("I'll hold"));
        assert!(contextual_reply("Hi, who is this").reply.starts_with("This is Eden"));
        assert!(contextual_reply(NO_SPEECH).reply.contains("repeat"));
        assert!(contextual_reply("It depends on the program you mean").reply.starts_with("Got it"));
    }
}
