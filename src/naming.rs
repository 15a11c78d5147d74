use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest display name, in characters.
pub const MAX_NAME_LEN: usize = 50;

/// Length of the random disambiguator appended to shortened names.
const SUFFIX_LEN: usize = 4;

/// Length of the disambiguator used when a storage location is taken.
const LOCATION_SUFFIX_LEN: usize = 7;

/// Split a file name into base and extension (with its leading dot).
///
/// Leading dots do not start an extension, so `.bashrc` has none.
///
/// ```
/// use docshelf::naming::split_extension;
///
/// assert_eq!(split_extension("report.final.pdf"), ("report.final", ".pdf"));
/// assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
/// assert_eq!(split_extension("README"), ("README", ""));
/// ```
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => {
            name.split_at(idx)
        }
        _ => (name, ""),
    }
}

/// Reduce a client-supplied upload name to its final path component.
///
/// Returns `None` when nothing usable is left (empty, `.` or `..`).
pub fn upload_name(raw: &str) -> Option<&str> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// Shorten `name` to at most [`MAX_NAME_LEN`] characters.
///
/// Names that already fit are returned unchanged. Longer names keep their
/// extension; the base is cut so that `_` plus a random 4-character suffix
/// and the extension fit exactly. The suffix makes collisions unlikely, not
/// impossible.
pub fn fit_name_length(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_LEN {
        return name.to_string();
    }

    let budget = MAX_NAME_LEN - SUFFIX_LEN - 1;
    let (mut base, mut ext) = split_extension(name);
    if ext.chars().count() > budget {
        base = name;
        ext = "";
    }

    let keep = budget - ext.chars().count();
    let trimmed: String = base.chars().take(keep).collect();
    format!("{trimmed}_{}{ext}", random_suffix(SUFFIX_LEN))
}

/// Check a user-supplied base name against the rename allow-list: word
/// characters, `-`, `.` and space.
pub fn validate_base_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| {
            c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

/// Derive another candidate file name when `name` is already taken on disk.
pub fn alternative_name(name: &str) -> String {
    let (base, ext) = split_extension(name);
    format!("{base}_{}{ext}", random_suffix(LOCATION_SUFFIX_LEN))
}

fn random_suffix(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..len].to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn short_names_are_untouched() {
        assert_eq!(fit_name_length("notes.pdf"), "notes.pdf");
        let exactly = format!("{}.pdf", "a".repeat(46));
        assert_eq!(fit_name_length(&exactly), exactly);
    }

    #[test]
    fn long_name_is_cut_to_limit() {
        let name = format!("{}.docx", "quarterly-report-".repeat(5));
        let fitted = fit_name_length(&name);

        assert_eq!(fitted.chars().count(), MAX_NAME_LEN);
        assert!(fitted.ends_with(".docx"));
        assert!(fitted.starts_with("quarterly-report-"));

        let (base, _) = split_extension(&fitted);
        let suffix = &base[base.len() - SUFFIX_LEN..];
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(&base[base.len() - SUFFIX_LEN - 1..][..1], "_");
    }

    #[test]
    fn long_name_without_extension() {
        let fitted = fit_name_length(&"x".repeat(80));
        assert_eq!(fitted.chars().count(), MAX_NAME_LEN);
        assert!(fitted.starts_with(&"x".repeat(45)));
    }

    #[test]
    fn oversized_extension_is_treated_as_base() {
        let name = format!("a.{}", "b".repeat(60));
        let fitted = fit_name_length(&name);
        assert_eq!(fitted.chars().count(), MAX_NAME_LEN);
        assert!(fitted.starts_with("a.bbb"));
    }

    #[test]
    fn multibyte_names_are_counted_in_characters() {
        let name = format!("{}.png", "ü".repeat(60));
        let fitted = fit_name_length(&name);
        assert_eq!(fitted.chars().count(), MAX_NAME_LEN);
        assert!(fitted.ends_with(".png"));
    }

    #[test]
    fn upload_name_drops_directories() {
        assert_eq!(upload_name("scan.png"), Some("scan.png"));
        assert_eq!(upload_name("/tmp/in/report.pdf"), Some("report.pdf"));
        assert_eq!(upload_name("C:\\Users\\me\\memo.doc"), Some("memo.doc"));
        assert_eq!(upload_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(upload_name("dir/"), None);
        assert_eq!(upload_name(".."), None);
    }

    #[test]
    fn validate_accepts_allowed_characters() {
        assert!(validate_base_name("Annual report 2024_v2.final-draft").is_ok());
        assert!(validate_base_name("résumé").is_ok());
    }

    #[test]
    fn validate_rejects_other_characters() {
        for bad in ["", "a/b", "a\\b", "what?", "x:y", "semi;colon"] {
            let err = validate_base_name(bad).unwrap_err();
            assert_eq!(err.code(), "invalid-name", "{bad:?}");
        }
    }

    #[test]
    fn alternative_name_keeps_extension() {
        let alt = alternative_name("scan.jpeg");
        assert!(alt.starts_with("scan_"));
        assert!(alt.ends_with(".jpeg"));
        assert_eq!(alt.len(), "scan_".len() + LOCATION_SUFFIX_LEN + 5);
        assert_ne!(alt, alternative_name("scan.jpeg"));
    }

    proptest! {
        #[test]
        fn fitted_names_respect_limit_and_extension(
            base in "[A-Za-z0-9 _-]{47,120}",
            ext in prop::sample::select(vec![".pdf", ".doc", ".docx", ".png", ".jpeg"]),
        ) {
            let name = format!("{base}{ext}");
            let fitted = fit_name_length(&name);
            prop_assert!(fitted.chars().count() <= MAX_NAME_LEN);
            prop_assert!(fitted.ends_with(ext));
        }

        #[test]
        fn names_within_limit_are_kept(name in "[A-Za-z0-9_-]{1,46}\\.pdf") {
            prop_assert_eq!(fit_name_length(&name), name);
        }
    }
}
