//! Caption persistence. The metadata object is a sibling of the image,
//! related only by the derived key, never by an explicit reference.

use crate::models::captions::Caption;
use crate::store::{Error, ObjectProvider};

const METADATA_SUFFIX: &str = ".json";

/// Derives the metadata key from an image filename by swapping a trailing
/// `.jpeg` or `.jpg` for `.json`. The match is case-sensitive and limited to
/// those two literal suffixes; any other name comes back unchanged, so its
/// "metadata key" still carries the original extension. Longstanding
/// behavior, kept as-is.
pub fn metadata_key(filename: &str) -> String {
    for suffix in &[".jpeg", ".jpg"] {
        if let Some(stem) = filename.strip_suffix(suffix) {
            return format!("{}{}", stem, METADATA_SUFFIX);
        }
    }

    filename.to_string()
}

/// Serializes the caption as JSON and writes it under the derived key.
pub async fn save<S>(store: &S, filename: &str, caption: &Caption) -> Result<String, Error>
where
    S: ObjectProvider + Sync + ?Sized,
{
    let key = metadata_key(filename);
    let body = serde_json::to_vec(caption)?;

    store
        .write_blob(&key, &body, Some("application/json"))
        .await
}

/// Reads the caption stored next to `filename`. A missing metadata object is
/// an ordinary outcome and yields placeholder text; malformed stored JSON is
/// a real error.
pub async fn load<S>(store: &S, filename: &str) -> Result<Caption, Error>
where
    S: ObjectProvider + Sync + ?Sized,
{
    let key = metadata_key(filename);

    match store.read_blob(&key).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(Error::NotFound { .. }) => Ok(Caption::missing()),
        Err(err) => Err(err),
    }
}
