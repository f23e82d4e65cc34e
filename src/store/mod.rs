use anyhow::Context;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use thiserror::Error;

pub mod metadata;

/// Key suffixes treated as gallery images when listing the bucket.
pub const IMAGE_SUFFIXES: &[&str] = &[".jpg", ".jpeg"];

#[derive(Error, Debug)]
pub enum Error {
    #[error("object {key} not found")]
    NotFound { key: String },
    #[error("object store error")]
    S3(#[from] s3::error::S3Error),
    #[error("object store returned status {code} for {key}")]
    UnexpectedStatus { key: String, code: u16 },
    #[error("metadata serialization error")]
    Json(#[from] serde_json::Error),
}

/// Blob operations the application needs from the bucket. Listing is a full
/// scan filtered client-side, which is fine for the small galleries this
/// serves.
#[async_trait::async_trait]
pub trait ObjectProvider {
    /// Writes `bytes` under `key`, overwriting any existing object, and
    /// returns a locator string for it.
    async fn write_blob(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<String, Error>;

    async fn read_blob(&self, key: &str) -> Result<Vec<u8>, Error>;

    async fn blob_exists(&self, key: &str) -> Result<bool, Error>;

    async fn list_keys(&self) -> Result<Vec<String>, Error>;

    async fn list_with_suffixes(&self, suffixes: &[&str]) -> Result<Vec<String>, Error> {
        Ok(keys_with_suffixes(self.list_keys().await?, suffixes))
    }
}

#[async_trait::async_trait]
impl ObjectProvider for Bucket {
    async fn write_blob(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<String, Error> {
        let response = match content_type {
            Some(content_type) => {
                self.put_object_with_content_type(key, bytes, content_type)
                    .await?
            },
            None => self.put_object(key, bytes).await?,
        };

        match response.status_code() {
            200..=299 => Ok(format!("s3://{}/{}", self.name(), key)),
            code => Err(Error::UnexpectedStatus {
                key: key.to_string(),
                code,
            }),
        }
    }

    async fn read_blob(&self, key: &str) -> Result<Vec<u8>, Error> {
        let response = self.get_object(key).await?;

        match response.status_code() {
            200..=299 => Ok(response.bytes().to_vec()),
            404 => Err(Error::NotFound {
                key: key.to_string(),
            }),
            code => Err(Error::UnexpectedStatus {
                key: key.to_string(),
                code,
            }),
        }
    }

    async fn blob_exists(&self, key: &str) -> Result<bool, Error> {
        let (_, code) = self.head_object(key).await?;

        match code {
            200..=299 => Ok(true),
            404 => Ok(false),
            code => Err(Error::UnexpectedStatus {
                key: key.to_string(),
                code,
            }),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, Error> {
        let pages = self.list(String::new(), None).await?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| object.key)
            .collect())
    }
}

/// Case-insensitive suffix filter over bucket keys. Suffixes are expected in
/// lowercase.
pub fn keys_with_suffixes(keys: Vec<String>, suffixes: &[&str]) -> Vec<String> {
    keys.into_iter()
        .filter(|key| {
            let lowered = key.to_lowercase();
            suffixes.iter().any(|suffix| lowered.ends_with(suffix))
        })
        .collect()
}

pub fn open_bucket(
    region_endpoint: &str,
    bucket_name: &str,
    access_key_id: &str,
    secret_access_key: &str,
) -> anyhow::Result<Bucket> {
    let credentials = Credentials::new(
        Some(access_key_id),
        Some(secret_access_key),
        None,
        None,
        None,
    )
    .context("couldn't create S3 credentials instance")?;

    let region_name = region_endpoint
        .splitn(2, '.')
        .next()
        .unwrap_or(region_endpoint)
        .to_string();

    let bucket = Bucket::new(
        bucket_name,
        s3::Region::Custom {
            region: region_name,
            endpoint: region_endpoint.to_string(),
        },
        credentials,
    )
    .context("couldn't create S3 bucket instance")?
    .with_path_style();

    Ok(bucket)
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn suffix_filter_only_keeps_images() {
        let filtered = keys_with_suffixes(
            keys(&["cat.jpg", "cat.json", "notes.txt", "dog.jpeg", "archive.zip"]),
            IMAGE_SUFFIXES,
        );
        assert_eq!(filtered, keys(&["cat.jpg", "dog.jpeg"]));
    }

    #[test]
    fn suffix_filter_is_case_insensitive() {
        let filtered = keys_with_suffixes(keys(&["CAT.JPG", "Dog.JpEg", "CAT.JSON"]), IMAGE_SUFFIXES);
        assert_eq!(filtered, keys(&["CAT.JPG", "Dog.JpEg"]));
    }

    #[test]
    fn suffix_filter_of_empty_listing_is_empty() {
        assert!(keys_with_suffixes(Vec::new(), IMAGE_SUFFIXES).is_empty());
    }

    #[async_std::test]
    async fn uploaded_bytes_read_back_identically() {
        let store = MemoryStore::default();
        let bytes = b"\xff\xd8\xff\xe0fake jpeg body".to_vec();

        store.write_blob("cat.jpg", &bytes, None).await.unwrap();

        assert_eq!(store.read_blob("cat.jpg").await.unwrap(), bytes);
    }

    #[async_std::test]
    async fn listing_with_suffixes_ignores_metadata_objects() {
        let store = MemoryStore::default();
        store.write_blob("cat.jpg", b"image", None).await.unwrap();
        store
            .write_blob("cat.json", b"{}", Some("application/json"))
            .await
            .unwrap();

        let listed = store.list_with_suffixes(IMAGE_SUFFIXES).await.unwrap();
        assert_eq!(listed, keys(&["cat.jpg"]));
    }

    #[async_std::test]
    async fn read_of_absent_key_is_not_found() {
        let store = MemoryStore::default();
        assert!(matches!(
            store.read_blob("ghost.jpg").await,
            Err(Error::NotFound { .. })
        ));
        assert!(!store.blob_exists("ghost.jpg").await.unwrap());
    }
}
