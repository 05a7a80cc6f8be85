//! Image objects on local disk, served back under `/media`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use uuid::Uuid;

/// Content types accepted for upload with their file extensions; the first
/// extension is the canonical one.
const IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
    ("image/avif", &["avif"]),
];

/// Extension to store an upload under, or `None` when the content type is
/// not an accepted image. The client's file name only picks between the
/// extensions valid for that type.
pub fn image_extension(content_type: &str, filename: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    let (_, extensions) = IMAGE_TYPES.iter().find(|(ty, _)| *ty == mime)?;

    let requested = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    requested
        .and_then(|ext| extensions.iter().find(|e| **e == ext).copied())
        .or_else(|| extensions.first().copied())
}

/// Where an upload lands, relative to the storage root.
pub fn object_path(folder: &str, extension: &str) -> String {
    format!("{}/{}.{}", folder, Uuid::new_v4(), extension)
}

pub async fn write_object(root: &Path, path: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let full = root.join(path);
    if let Some(dir) = full.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    tokio::fs::write(&full, bytes)
        .await
        .with_context(|| format!("Failed to write {}", full.display()))?;
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_image_types_are_accepted() {
        assert_eq!(image_extension("image/png", "shot.png"), Some("png"));
        assert_eq!(image_extension("image/jpeg", "photo.JPEG"), Some("jpeg"));
        assert_eq!(image_extension("image/jpeg", "photo.png"), Some("jpg"));
        assert_eq!(image_extension("image/webp; charset=binary", "x"), Some("webp"));
        assert_eq!(image_extension("image/svg+xml", "logo.svg"), None);
        assert_eq!(image_extension("application/pdf", "doc.png"), None);
    }

    #[test]
    fn object_paths_stay_inside_the_folder() {
        let path = object_path("pages/abc", "png");
        assert!(path.starts_with("pages/abc/"));
        assert!(path.ends_with(".png"));
    }

    #[tokio::test]
    async fn objects_are_written_under_the_root() {
        let root = tempfile::tempdir().unwrap();
        let full = write_object(root.path(), "avatars/u1/a.png", b"\x89PNG")
            .await
            .unwrap();
        assert!(full.starts_with(root.path()));
        assert_eq!(tokio::fs::read(&full).await.unwrap(), b"\x89PNG");
    }
}
