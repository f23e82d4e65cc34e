//! Image captioning through the Gemini generateContent REST endpoint.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::captions::Caption;

/// Title used by the reply parser when no title line or field is present.
pub const DEFAULT_TITLE: &str = "Unknown";
/// Description used by the reply parser when none is present.
pub const DEFAULT_DESCRIPTION: &str = "No description available";

const JSON_PROMPT: &str = "Analyze this image and generate a short and catchy title for it, \
     and a detailed description of what is happening in it. \
     Reply with a single JSON object with \"title\" and \"description\" string fields.";

const TEXT_PROMPT: &str = "Analyze this image and generate:\n\
     1. A short and catchy title for the image.\n\
     2. A detailed description of what is happening in the image.\n\n\
     Format the response as:\n\
     Title: <short title here>\n\
     Description: <detailed description here>";

#[derive(Error, Debug)]
enum GenerateError {
    #[error("{0}")]
    Decode(#[from] image::ImageError),
    #[error("caption request failed: {0}")]
    Http(String),
    #[error("caption service returned status {0}")]
    Status(surf::StatusCode),
}

/// Synchronous (non-streamed) captioning client. One `generateContent` call
/// per image; the caller blocks until the full reply is produced.
pub struct Captioner {
    client: surf::Client,
    endpoint: String,
    model: String,
    api_key: String,
    structured: bool,
}

impl std::fmt::Debug for Captioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The API key stays out of debug output.
        f.debug_struct("Captioner")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("structured", &self.structured)
            .finish_non_exhaustive()
    }
}

impl Captioner {
    /// `structured` requests a JSON reply from the model. The plain-text
    /// Title:/Description: mode is kept as a compatibility fallback and the
    /// parser accepts both shapes regardless.
    pub fn new(endpoint: String, model: String, api_key: String, structured: bool) -> Self {
        Captioner {
            client: surf::client(),
            endpoint,
            model,
            api_key,
            structured,
        }
    }

    /// Captioning never fails the upload: every error is degraded into a
    /// sentinel caption recording what went wrong.
    pub async fn generate(&self, image_bytes: &[u8]) -> Caption {
        match self.request_caption(image_bytes).await {
            Ok(caption) => caption,
            Err(err) => {
                tracing::warn!("caption generation failed: {}", err);
                failure_caption(&err)
            },
        }
    }

    async fn request_caption(&self, image_bytes: &[u8]) -> Result<Caption, GenerateError> {
        image::load_from_memory(image_bytes)?;

        let prompt = if self.structured {
            JSON_PROMPT
        } else {
            TEXT_PROMPT
        };
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart::text(prompt), RequestPart::inline_image(image_bytes)],
            }],
            generation_config: if self.structured {
                Some(GenerationConfig {
                    response_mime_type: Some("application/json".to_string()),
                })
            } else {
                None
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.endpoint.trim_end_matches('/'),
            self.model,
            self.api_key,
        );

        let body = surf::Body::from_json(&request)
            .map_err(|err| GenerateError::Http(err.to_string()))?;
        let mut res = self
            .client
            .post(&url)
            .body(body)
            .await
            .map_err(|err| GenerateError::Http(err.to_string()))?;

        if !res.status().is_success() {
            return Err(GenerateError::Status(res.status()));
        }

        let reply: GenerateContentResponse = res
            .body_json()
            .await
            .map_err(|err| GenerateError::Http(err.to_string()))?;

        Ok(match reply.reply_text() {
            Some(text) => parse_reply(&text),
            None => empty_reply_caption(),
        })
    }
}

fn empty_reply_caption() -> Caption {
    Caption::new("Error", "Gemini AI returned an empty response")
}

fn failure_caption(err: &impl std::fmt::Display) -> Caption {
    Caption::new("Error", format!("Could not generate caption: {}", err))
}

/// Turns the model's reply text into a caption. Structured JSON replies are
/// tried first; anything else goes through the line-prefix heuristic, which
/// scans for lines starting with `Title:` / `Description:` (any case) and
/// keeps the defaults for labels that never appear.
pub fn parse_reply(text: &str) -> Caption {
    if let Ok(reply) = serde_json::from_str::<StructuredReply>(text.trim()) {
        return Caption {
            title: reply.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: reply
                .description
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        };
    }

    let mut title = DEFAULT_TITLE.to_string();
    let mut description = DEFAULT_DESCRIPTION.to_string();

    for line in text.lines() {
        if let Some(rest) = strip_prefix_ignore_case(line, "Title:") {
            title = rest.trim().to_string();
        } else if let Some(rest) = strip_prefix_ignore_case(line, "Description:") {
            description = rest.trim().to_string();
        }
    }

    Caption { title, description }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    match line.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => Some(&line[prefix.len()..]),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StructuredReply {
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl RequestPart {
    fn text(text: &str) -> Self {
        RequestPart {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline_image(bytes: &[u8]) -> Self {
        RequestPart {
            text: None,
            inline_data: Some(InlineData {
                mime_type: "image/jpeg".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateContentResponse {
    candidates: Vec<ReplyCandidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplyCandidate {
    content: ReplyContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplyContent {
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplyPart {
    text: String,
}

impl GenerateContentResponse {
    /// Joined text of the first candidate's parts, or `None` for an empty or
    /// part-less reply.
    fn reply_text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.parts;
        if parts.is_empty() {
            return None;
        }

        let text = parts
            .iter()
            .map(|part| part.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labeled_lines() {
        let caption = parse_reply("Title: Cat\nDescription: A cat.");
        assert_eq!(caption, Caption::new("Cat", "A cat."));
    }

    #[test]
    fn label_order_does_not_matter() {
        let caption = parse_reply(
            "Here is what I found.\nDescription: A red fox at dusk.\nSome filler.\nTitle: Fox",
        );
        assert_eq!(caption, Caption::new("Fox", "A red fox at dusk."));
    }

    #[test]
    fn label_case_is_irrelevant() {
        let caption = parse_reply("TITLE: Shouting\ndescription: lower case label");
        assert_eq!(caption, Caption::new("Shouting", "lower case label"));
    }

    #[test]
    fn absent_labels_fall_back_to_defaults() {
        let caption = parse_reply("The model rambled without any labels.");
        assert_eq!(caption.title, DEFAULT_TITLE);
        assert_eq!(caption.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn bare_label_yields_empty_value() {
        let caption = parse_reply("Title:\nDescription: something");
        assert_eq!(caption.title, "");
        assert_eq!(caption.description, "something");
    }

    #[test]
    fn structured_json_reply_is_parsed_directly() {
        let caption = parse_reply(r#"{"title":"Cat","description":"A cat."}"#);
        assert_eq!(caption, Caption::new("Cat", "A cat."));
    }

    #[test]
    fn structured_reply_missing_fields_uses_defaults() {
        let caption = parse_reply(r#"{"title":"Only a title"}"#);
        assert_eq!(caption.title, "Only a title");
        assert_eq!(caption.description, DEFAULT_DESCRIPTION);
    }

    #[test]
    fn empty_reply_caption_is_the_documented_sentinel() {
        let caption = empty_reply_caption();
        assert_eq!(
            caption,
            Caption::new("Error", "Gemini AI returned an empty response")
        );
    }

    #[test]
    fn failure_caption_carries_the_message() {
        let caption = failure_caption(&"decode blew up");
        assert_eq!(caption.title, "Error");
        assert_eq!(caption.description, "Could not generate caption: decode blew up");
    }

    #[test]
    fn reply_text_of_candidate_less_response_is_none() {
        let reply: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(reply.reply_text(), None);
    }

    #[test]
    fn reply_text_of_part_less_candidate_is_none() {
        let reply: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[]}}]}"#).unwrap();
        assert_eq!(reply.reply_text(), None);
    }

    #[test]
    fn reply_text_joins_parts_of_first_candidate() {
        let reply: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Title: Cat"},{"text":"Description: A cat."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            reply.reply_text().as_deref(),
            Some("Title: Cat\nDescription: A cat.")
        );
    }

    #[test]
    fn multibyte_lines_do_not_confuse_the_prefix_match() {
        let caption = parse_reply("日本語のタイトルです\nTitle: Cat");
        assert_eq!(caption.title, "Cat");
    }
}
