//! Survey link generation for the `{{survey_url}}` placeholder.

use url::form_urlencoded::byte_serialize;

pub trait SurveyUrlGenerator: Send + Sync {
    /// Link to `form_id` that identifies the recipient by `identifier`.
    fn survey_url(&self, form_id: &str, identifier: &str) -> String;
}

/// Links of the form `{base}/f/{form_id}?r={identifier}`, both parts
/// URL-encoded.
#[derive(Debug, Clone)]
pub struct HostedSurveyLinks {
    base_url: String,
}

impl HostedSurveyLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn encode(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect()
}

impl SurveyUrlGenerator for HostedSurveyLinks {
    fn survey_url(&self, form_id: &str, identifier: &str) -> String {
        format!("{}/f/{}?r={}", self.base_url, encode(form_id), encode(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_is_url_encoded() {
        let links = HostedSurveyLinks::new("https://forms.example.com/");
        assert_eq!(
            links.survey_url("nps-q3", "ana+test@example.com"),
            "https://forms.example.com/f/nps-q3?r=ana%2Btest%40example.com"
        );
        assert_eq!(
            links.survey_url("nps-q3", "+15550001111"),
            "https://forms.example.com/f/nps-q3?r=%2B15550001111"
        );
    }
}
