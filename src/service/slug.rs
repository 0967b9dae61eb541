//! Slug derivation for artifacts: NFD-normalize, strip diacritics, keep
//! `[a-z0-9 -]`, join on dashes, cap at the slug length limit. The
//! transform is idempotent, so stored slugs pass through unchanged.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::MAX_SLUG_LEN;

pub fn slugify(input: &str) -> String {
    let folded: String = input.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let lower = folded.to_lowercase();

    let mut slug = String::with_capacity(lower.len());
    let mut pending_dash = false;
    for c in lower.chars() {
        match c {
            'a'..='z' | '0'..='9' => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c);
            }
            ' ' | '\t' | '\n' | '\r' | '-' => pending_dash = true,
            _ => {}
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_titles() {
        assert_eq!(slugify("User Authentication Service"), "user-authentication-service");
        assert_eq!(slugify("  spaced   out  "), "spaced-out");
        assert_eq!(slugify("v2.0 (final)"), "v20-final");
    }

    #[test]
    fn diacritics_fold_to_ascii() {
        assert_eq!(slugify("Café Crème"), "cafe-creme");
        assert_eq!(slugify("Überblick"), "uberblick");
    }

    #[test]
    fn slugify_is_idempotent() {
        for input in [
            "User Authentication Service",
            "Café Crème",
            "--weird -- dashes--",
            "MiXeD CaSe 123",
            &"long word ".repeat(30),
        ] {
            let once = slugify(input);
            assert_eq!(slugify(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn length_is_capped() {
        let slug = slugify(&"a".repeat(500));
        assert_eq!(slug.len(), MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
    }
}
