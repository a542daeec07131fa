use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use uuid::Uuid;

use crate::{
    config::MediaSection,
    constants::IMAGE_EXTENSIONS,
    database::error::{Error, HtmlError},
};

const IMAGE_DIR: &str = "recipes/images";

/// Writes uploaded recipe images to disk and hands back their public url.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    url: String,
}

/// Splits `data:image/<ext>;base64,<payload>` into extension and payload.
fn parse_data_url(value: &str) -> Result<(&str, &str), Error> {
    let invalid = || HtmlError::InvalidRequest.field("image", "Invalid image payload");

    let rest = value.strip_prefix("data:image/").ok_or_else(invalid)?;
    let (extension, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;
    if !IMAGE_EXTENSIONS.contains(&extension) {
        return Err(HtmlError::InvalidRequest.field(
            "image",
            &format!("Unsupported image type '{extension}'"),
        ));
    }
    if payload.is_empty() {
        return Err(invalid());
    }

    Ok((extension, payload))
}

impl MediaStorage {
    pub fn new(settings: &MediaSection) -> Self {
        Self {
            root: settings.root.to_owned(),
            url: settings.url.to_owned(),
        }
    }

    /// Decodes a base64 data url and stores it under a fresh file name.
    pub async fn save_data_url(&self, value: &str) -> Result<String, Error> {
        let (extension, payload) = parse_data_url(value)?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|_| HtmlError::InvalidRequest.field("image", "Invalid image payload"))?;

        let relative = format!("{IMAGE_DIR}/{}.{extension}", Uuid::new_v4());
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HtmlError::Internal.new(&format!("Failed to create media dir: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| HtmlError::Internal.new(&format!("Failed to store image: {e}")))?;

        log::debug!("Stored image {}", path.display());
        Ok(format!("{}{relative}", self.url))
    }

    /// Deletes an image stored by `save_data_url`. Urls outside the media
    /// root are left alone.
    pub async fn discard(&self, url: &str) {
        let Some(relative) = url.strip_prefix(&self.url) else {
            return;
        };
        if !relative.starts_with(IMAGE_DIR) || relative.contains("..") {
            return;
        }

        let path = self.root.join(relative);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => log::debug!("Discarded image {}", path.display()),
            Err(e) => log::warn!("Failed to discard image {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn storage(root: &std::path::Path) -> MediaStorage {
        MediaStorage::new(&MediaSection {
            root: root.to_path_buf(),
            url: "/media/".to_string(),
        })
    }

    #[tokio::test]
    async fn image_is_written_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let payload = STANDARD.encode(b"\x89PNG fake");

        let url = storage(dir.path())
            .save_data_url(&format!("data:image/png;base64,{payload}"))
            .await
            .unwrap();

        assert!(url.starts_with("/media/recipes/images/"));
        assert!(url.ends_with(".png"));
        let stored = dir.path().join(url.trim_start_matches("/media/"));
        assert_eq!(std::fs::read(stored).unwrap(), b"\x89PNG fake");
    }

    #[tokio::test]
    async fn discard_removes_only_stored_images() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let payload = STANDARD.encode(b"img");

        let url = storage
            .save_data_url(&format!("data:image/gif;base64,{payload}"))
            .await
            .unwrap();
        let stored = dir.path().join(url.trim_start_matches("/media/"));
        assert!(stored.exists());

        storage.discard(&url).await;
        assert!(!stored.exists());

        let outside = dir.path().join("keep.txt");
        std::fs::write(&outside, b"keep").unwrap();
        storage.discard("/media/keep.txt").await;
        storage.discard("/media/recipes/images/../../keep.txt").await;
        assert!(outside.exists());
    }

    #[rstest]
    #[case("not a data url")]
    #[case("data:image/png,abc")]
    #[case("data:image/exe;base64,AAAA")]
    #[case("data:image/png;base64,")]
    #[case("data:image/png;base64,***")]
    #[tokio::test]
    async fn malformed_images_are_rejected(#[case] value: &str) {
        let dir = tempfile::tempdir().unwrap();
        let error = storage(dir.path()).save_data_url(value).await.unwrap_err();

        assert_eq!(error.kind(), HtmlError::InvalidRequest);
        assert_eq!(error.field.as_deref(), Some("image"));
    }
}
