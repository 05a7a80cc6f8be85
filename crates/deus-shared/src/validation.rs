//! Input checks shared by the client (before any request) and the server
//! (before touching the database).

use std::sync::LazyLock;

use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_FULL_NAME_LEN: usize = 100;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)https?://[a-z0-9]([a-z0-9.-]*[a-z0-9])?(:\d+)?(/\S*)?$").unwrap());

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap());

static FOLDER_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Title cannot be empty")]
    EmptyTitle,
    #[error("Title must be at most {} characters", MAX_TITLE_LEN)]
    TitleTooLong,
    #[error("A link page needs a URL")]
    MissingUrl,
    #[error("URL is not valid")]
    InvalidUrl,
    #[error("Email is required")]
    MissingEmail,
    #[error("Email is not valid")]
    InvalidEmail,
    #[error("Password must be at least {} characters", MIN_PASSWORD_LEN)]
    PasswordTooShort,
    #[error("Password confirmation does not match")]
    PasswordMismatch,
    #[error("Slug may only contain lowercase letters, digits and single hyphens")]
    InvalidSlug,
    #[error("Upload folder is not valid")]
    InvalidFolder,
    #[error("Name must be at most {} characters", MAX_FULL_NAME_LEN)]
    NameTooLong,
}

/// Trimmed, non-empty title.
pub fn validate_title(title: &str) -> Result<String, ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong);
    }
    Ok(title.to_string())
}

/// Trimmed absolute http(s) URL with a host.
pub fn validate_external_url(url: &str) -> Result<String, ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::MissingUrl);
    }
    if !URL_RE.is_match(url) {
        return Err(ValidationError::InvalidUrl);
    }
    Ok(url.to_string())
}

pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::MissingEmail);
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(email.to_lowercase())
        }
        _ => Err(ValidationError::InvalidEmail),
    }
}

pub fn validate_new_password(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if SLUG_RE.is_match(slug) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSlug)
    }
}

/// Display name as stored: trimmed, and `None` when blank.
pub fn validate_full_name(name: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > MAX_FULL_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }
    Ok(Some(name.to_string()))
}

/// Upload folder made of plain path segments, e.g. `pages/<id>`.
pub fn validate_storage_folder(folder: &str) -> Result<String, ValidationError> {
    let folder = folder.trim().trim_matches('/');
    if folder.is_empty() || !folder.split('/').all(|seg| FOLDER_SEGMENT_RE.is_match(seg)) {
        return Err(ValidationError::InvalidFolder);
    }
    Ok(folder.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_names_are_trimmed_and_blank_clears() {
        assert_eq!(validate_full_name(Some("  Ayu Lestari ")), Ok(Some("Ayu Lestari".to_string())));
        assert_eq!(validate_full_name(Some("   ")), Ok(None));
        assert_eq!(validate_full_name(None), Ok(None));
        let long = "n".repeat(MAX_FULL_NAME_LEN + 1);
        assert_eq!(validate_full_name(Some(&long)), Err(ValidationError::NameTooLong));
    }

    #[test]
    fn titles_are_trimmed_and_required() {
        assert_eq!(validate_title("  Runbook "), Ok("Runbook".to_string()));
        assert_eq!(validate_title("   "), Err(ValidationError::EmptyTitle));
        assert_eq!(
            validate_title(&"x".repeat(MAX_TITLE_LEN + 1)),
            Err(ValidationError::TitleTooLong)
        );
    }

    #[test]
    fn urls_need_scheme_and_host() {
        assert!(validate_external_url("https://docs.google.com/spreadsheets/d/abc/edit").is_ok());
        assert!(validate_external_url("http://localhost:8080").is_ok());
        assert_eq!(validate_external_url(""), Err(ValidationError::MissingUrl));
        assert_eq!(validate_external_url("docs.google.com"), Err(ValidationError::InvalidUrl));
        assert_eq!(validate_external_url("https://"), Err(ValidationError::InvalidUrl));
        assert_eq!(validate_external_url("ftp://host/file"), Err(ValidationError::InvalidUrl));
    }

    #[test]
    fn passwords_need_length_and_confirmation() {
        assert_eq!(validate_new_password("short", "short"), Err(ValidationError::PasswordTooShort));
        assert_eq!(
            validate_new_password("longenough", "longenougH"),
            Err(ValidationError::PasswordMismatch)
        );
        assert_eq!(validate_new_password("longenough", "longenough"), Ok(()));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(validate_email(" Ops@Example.com "), Ok("ops@example.com".to_string()));
        assert_eq!(validate_email(""), Err(ValidationError::MissingEmail));
        assert_eq!(validate_email("ops"), Err(ValidationError::InvalidEmail));
        assert_eq!(validate_email("@example.com"), Err(ValidationError::InvalidEmail));
    }

    #[test]
    fn slugs_match_slugify_output() {
        assert!(validate_slug("hello-world").is_ok());
        assert!(validate_slug(&crate::slug::slugify("Hello, World!")).is_ok());
        assert!(validate_slug("Hello").is_err());
        assert!(validate_slug("a--b").is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn storage_folders_reject_traversal() {
        assert_eq!(validate_storage_folder("/pages/abc-1/"), Ok("pages/abc-1".to_string()));
        assert!(validate_storage_folder("pages/../secrets").is_err());
        assert!(validate_storage_folder("pages//x").is_err());
        assert!(validate_storage_folder("").is_err());
    }
}
