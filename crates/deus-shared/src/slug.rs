use rand::Rng;

/// Slug used when a title has no ASCII letters or digits at all.
pub const FALLBACK_SLUG: &str = "page";

/// Generate a URL-safe slug from a title.
///
/// Lowercases, drops quotes, turns every run of characters outside `[a-z0-9]`
/// into a single hyphen and trims hyphens from both ends.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if matches!(c, '\'' | '"' | '’' | '‘' | '“' | '”') {
            continue;
        }
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Slug for a new page, disambiguated against the slugs already loaded.
///
/// Only the caller's local view is consulted, so two clients creating the
/// same title at once can still collide.
pub fn unique_slug<R, F>(title: &str, taken: F, rng: &mut R) -> String
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    let base = slugify(title);
    if !taken(&base) {
        return base;
    }

    loop {
        let candidate = format!("{}-{:04x}", base, rng.gen::<u16>());
        if !taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn strips_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(slugify("  multiple   spaces "), "multiple-spaces");
    }

    #[test]
    fn collapses_repeated_separators() {
        assert_eq!(slugify("SOP -- Onboarding__v2"), "sop-onboarding-v2");
        assert_eq!(slugify("---edge---"), "edge");
    }

    #[test]
    fn drops_quotes_without_splitting_words() {
        assert_eq!(slugify("Don't \"panic\""), "dont-panic");
    }

    #[test]
    fn non_ascii_letters_become_separators() {
        assert_eq!(slugify("Café Menü 2024"), "caf-men-2024");
    }

    #[test]
    fn empty_titles_fall_back() {
        assert_eq!(slugify("!!!"), FALLBACK_SLUG);
        assert_eq!(slugify(""), FALLBACK_SLUG);
    }

    #[test]
    fn unique_slug_keeps_free_base() {
        let mut rng = StdRng::seed_from_u64(7);
        let taken: HashSet<&str> = ["other"].into_iter().collect();
        assert_eq!(unique_slug("Team Calendar", |s| taken.contains(s), &mut rng), "team-calendar");
    }

    #[test]
    fn unique_slug_appends_hex_suffix_on_collision() {
        let mut rng = StdRng::seed_from_u64(7);
        let taken: HashSet<&str> = ["team-calendar"].into_iter().collect();
        let slug = unique_slug("Team Calendar", |s| taken.contains(s), &mut rng);

        let suffix = slug.strip_prefix("team-calendar-").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
