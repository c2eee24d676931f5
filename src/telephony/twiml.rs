//! TwiML builders for intake calls, conversational turns, and conference joins.
//!
//! Interpolated text has markup characters stripped rather than escaped.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum `<Say>` blocks per intake call.
pub const MAX_SAY_BLOCKS: usize = 12;

const SPEECH_HINTS: &str = "bed,beds,available,waitlist,intake,requirements,callback,full,capacity";

static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("sentence pattern compiles"));

/// Remove characters that would break out of XML text or attributes.
pub fn strip_markup(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '<' | '>' | '&' | '\'' | '"'))
        .collect()
}

/// Split a script into sentence-sized `<Say>` chunks, capped at [`MAX_SAY_BLOCKS`].
pub fn split_into_say_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    for line in text.lines() {
        let mut start = 0;
        for m in SENTENCE_BREAK.find_iter(line) {
            // Keep the punctuation with its sentence.
            let end = m.start() + 1;
            blocks.push(line[start..end].trim().to_string());
            start = m.end();
        }
        blocks.push(line[start..].trim().to_string());
    }
    blocks.retain(|b| !b.is_empty());
    blocks.truncate(MAX_SAY_BLOCKS);
    blocks
}

/// Content of a shelter intake call.
#[derive(Debug, Clone, Default)]
pub struct IntakeCall<'a> {
    pub shelter_name: &'a str,
    pub survivor_context: &'a str,
    pub callback_number: Option<&'a str>,
    pub script: Option<&'a str>,
    /// When set, the script plays inside a speech `<Gather>` posting here.
    pub gather_action_url: Option<&'a str>,
}

/// Make a URL safe for an XML attribute; query separators survive as `&amp;`.
fn attr_url(url: &str) -> String {
    url.chars()
        .filter(|c| !matches!(c, '<' | '>' | '\'' | '"'))
        .collect::<String>()
        .replace('&', "&amp;")
}

fn gather_open(action: &str) -> String {
    format!(
        r#"<Gather input="speech" action="{}" method="POST" timeout="15" speechTimeout="auto" hints="{SPEECH_HINTS}">"#,
        attr_url(action)
    )
}

fn say(text: &str) -> String {
    format!("<Say>{text}</Say>")
}

pub fn intake(call: &IntakeCall<'_>) -> String {
    let safe_script = call.script.map(strip_markup).filter(|s| !s.trim().is_empty());

    let says: Vec<String> = match safe_script {
        Some(script) => split_into_say_blocks(&script).iter().map(|b| say(b)).collect(),
        None => {
            let callback = call
                .callback_number
                .map(|n| format!(" Please call back {} if disconnected.", strip_markup(n)))
                .unwrap_or_default();
            vec![
                say("Hello. This is Eden calling about urgent shelter intake availability."),
                say(&format!(
                    "Is this intake staff for {}?",
                    strip_markup(call.shelter_name)
                )),
                say(&format!(
                    "Context: {}.{callback}",
                    strip_markup(call.survivor_context)
                )),
                say("Please connect us with intake staff, or share voicemail instructions for immediate placement follow-up."),
            ]
        }
    };

    let mut parts = vec!["<Response>".to_string()];
    match call.gather_action_url {
        Some(action) => {
            parts.push(gather_open(action));
            parts.extend(says);
            parts.push("</Gather>".into());
            parts.push(say(
                "We did not receive a response. We will follow up through our usual channels. Goodbye.",
            ));
        }
        None => parts.extend(says),
    }
    parts.push("</Response>".into());
    parts.concat()
}

/// One conversational turn: speak `reply`, then listen again or hang up.
pub fn follow_up(reply: &str, gather_action_url: Option<&str>, end_call: bool) -> String {
    let reply = say(&strip_markup(reply));
    let mut parts = vec!["<Response>".to_string()];
    match gather_action_url {
        Some(action) if !end_call => {
            parts.push(gather_open(action));
            parts.push(reply);
            parts.push("</Gather>".into());
            parts.push(say("We did not catch that. Goodbye."));
        }
        _ => {
            parts.push(reply);
            parts.push("<Hangup/>".into());
        }
    }
    parts.push("</Response>".into());
    parts.concat()
}

/// Join the caller into a named conference that survives either leg leaving.
pub fn conference_join(conference_name: &str) -> String {
    [
        "<Response>",
        "<Say>Connecting you to an Eden assisted transfer line.</Say>",
        "<Dial>",
        r#"<Conference startConferenceOnEnter="true" endConferenceOnExit="false">"#,
        &strip_markup(conference_name),
        "</Conference>",
        "</Dial>",
        "</Response>",
    ]
    .concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_characters() {
        assert_eq!(strip_markup(r#"<b>Tom & "Jerry's"</b>"#), "bTom  Jerrys/b");
    }

    #[test]
    fn splits_sentences_and_caps_blocks() {
        let blocks = split_into_say_blocks("Hello there. Do you have beds?\nThanks!");
        assert_eq!(blocks, ["Hello there.", "Do you have beds?", "Thanks!"]);

        let long = "One. ".repeat(20);
        assert_eq!(split_into_say_blocks(&long).len(), MAX_SAY_BLOCKS);
    }

    #[test]
    fn intake_with_script_uses_say_blocks() {
        let twiml = intake(&IntakeCall {
            shelter_name: "Harbor",
            survivor_context: "ignored",
            script: Some("Hi. We need a bed <now>."),
            ..IntakeCall::default()
        });
        assert_eq!(
            twiml,
            "<Response><Say>Hi.</Say><Say>We need a bed now.</Say></Response>"
        );
    }

    #[test]
    fn intake_default_mentions_shelter_and_callback() {
        let twiml = intake(&IntakeCall {
            shelter_name: "Harbor House",
            survivor_context: "one adult",
            callback_number: Some("+14155550199"),
            ..IntakeCall::default()
        });
        assert!(twiml.contains("Is this intake staff for Harbor House?"));
        assert!(twiml.contains("Context: one adult. Please call back +14155550199 if disconnected."));
    }

    #[test]
    fn intake_with_gather_wraps_script() {
        let twiml = intake(&IntakeCall {
            shelter_name: "Harbor",
            survivor_context: "",
            script: Some("Hello."),
            gather_action_url: Some("https://example.org/gather?job_id=1&attempt_id=2"),
            ..IntakeCall::default()
        });
        assert!(twiml.starts_with("<Response><Gather input=\"speech\""));
        assert!(twiml.contains("<Say>Hello.</Say></Gather>"));
        assert!(twiml.contains("job_id=1&amp;attempt_id=2"));
    }

    #[test]
    fn follow_up_hangs_up_when_ending() {
        assert_eq!(
            follow_up("Thank you.", Some("https://example.org/g"), true),
            "<Response><Say>Thank you.</Say><Hangup/></Response>"
        );
        let listening = follow_up("Go on.", Some("https://example.org/g"), false);
        assert!(listening.contains("<Gather"));
        assert!(!listening.contains("<Hangup/>"));
    }

    #[test]
    fn conference_join_names_room() {
        let twiml = conference_join("outreach-transfer-abc");
        assert!(twiml.contains(">outreach-transfer-abc</Conference>"));
        assert!(twiml.contains(r#"endConferenceOnExit="false""#));
    }
}
