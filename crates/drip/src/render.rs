//! Step content rendering against the frozen recipient snapshot.

use campaign_core::types::{Channel, RecipientSnapshot, Step};
use serde_json::Value;

/// Snapshot attribute consulted for Telegram destinations.
pub const TELEGRAM_CHAT_ID_ATTRIBUTE: &str = "telegram_chat_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
}

/// Render subject and body of `step`. `{{survey_url}}`, `{{name}}`,
/// `{{email}}`, `{{phone}}` and any snapshot attribute key are replaced;
/// anything else is left as written.
pub fn render_step(step: &Step, snapshot: &RecipientSnapshot, survey_url: &str) -> RenderedContent {
    let lookup = |key: &str| resolve_placeholder(key, snapshot, survey_url);
    RenderedContent {
        subject: step.subject.as_deref().map(|s| substitute(s, &lookup)),
        body: substitute(&step.body, &lookup),
    }
}

fn resolve_placeholder(key: &str, snapshot: &RecipientSnapshot, survey_url: &str) -> Option<String> {
    match key {
        "survey_url" => Some(survey_url.to_string()),
        "name" => snapshot.name().map(str::to_string),
        "email" => snapshot.email().map(str::to_string),
        "phone" => snapshot.phone().map(str::to_string),
        other => snapshot.attribute(other).map(value_text),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Single left-to-right pass over `{{ key }}` tokens. Replacement text is
/// never re-scanned.
fn substitute(template: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after_open[..close].trim();
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

/// Where a message for `channel` goes for this recipient, if anywhere.
pub fn resolve_destination(channel: Channel, snapshot: &RecipientSnapshot) -> Option<String> {
    match channel {
        Channel::Email => snapshot.email().map(str::to_string),
        Channel::Sms | Channel::Whatsapp => snapshot.phone().map(str::to_string),
        Channel::Telegram => snapshot
            .attribute(TELEGRAM_CHAT_ID_ATTRIBUTE)
            .map(value_text)
            .filter(|id| !id.trim().is_empty())
            .or_else(|| snapshot.phone().map(str::to_string)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::{Delay, Recipient};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn snapshot() -> RecipientSnapshot {
        let recipient = Recipient::with_email("ana@example.com")
            .named("Ana")
            .attribute("plan", json!("pro"))
            .attribute("seats", json!(12));
        RecipientSnapshot::capture(&recipient, Utc::now())
    }

    #[test]
    fn test_known_placeholders_replaced() {
        let step = Step::new(
            Uuid::new_v4(),
            1,
            "Hi {{name}}, your {{ plan }} plan ({{seats}} seats): {{survey_url}}",
            Delay::immediate(),
        )
        .with_subject("Quick question for {{name}}");

        let rendered = render_step(&step, &snapshot(), "https://f.example.com/f/x?r=ana");
        assert_eq!(
            rendered.body,
            "Hi Ana, your pro plan (12 seats): https://f.example.com/f/x?r=ana"
        );
        assert_eq!(rendered.subject.as_deref(), Some("Quick question for Ana"));
    }

    #[test]
    fn test_unknown_and_unterminated_left_alone() {
        let step = Step::new(
            Uuid::new_v4(),
            1,
            "{{ coupon }} and {{phone}} then {{survey_url",
            Delay::immediate(),
        );
        let rendered = render_step(&step, &snapshot(), "u");
        assert_eq!(rendered.body, "{{ coupon }} and {{phone}} then {{survey_url");
        assert_eq!(rendered.subject, None);
    }

    #[test]
    fn test_destination_per_channel() {
        let recipient = Recipient {
            email: Some("ana@example.com".into()),
            phone: Some("+15550001111".into()),
            ..Default::default()
        };
        let both = RecipientSnapshot::capture(&recipient, Utc::now());
        assert_eq!(resolve_destination(Channel::Email, &both).as_deref(), Some("ana@example.com"));
        assert_eq!(resolve_destination(Channel::Sms, &both).as_deref(), Some("+15550001111"));
        assert_eq!(resolve_destination(Channel::Telegram, &both).as_deref(), Some("+15550001111"));

        let chat = RecipientSnapshot::capture(
            &recipient.clone().attribute(TELEGRAM_CHAT_ID_ATTRIBUTE, json!(987654321)),
            Utc::now(),
        );
        assert_eq!(resolve_destination(Channel::Telegram, &chat).as_deref(), Some("987654321"));

        let email_only = snapshot();
        assert_eq!(resolve_destination(Channel::Whatsapp, &email_only), None);
    }
}
