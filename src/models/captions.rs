use serde::{Deserialize, Serialize};

/// AI-generated caption for an image, stored as its sibling metadata object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Caption {
    pub title: String,
    pub description: String,
}

impl Caption {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Caption {
            title: title.into(),
            description: description.into(),
        }
    }

    /// Placeholder shown for images whose metadata object was never written.
    pub fn missing() -> Self {
        Caption::new("No Title Found", "No Description Available")
    }
}
