#![forbid(unsafe_code)]

//! Security helpers for the tunebridge backend.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the binary is started as root. The server shells out to
/// external tools and serves arbitrary upstream bytes; a regular user account
/// keeps a misbehaving upstream or subprocess contained.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Reduces an upstream track title to something safe inside a
/// `Content-Disposition` filename: no path separators, no quotes, no control
/// characters, and never empty.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '"' | '\'' | ':' | '*' | '?' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches('.').trim();
    if trimmed.is_empty() {
        return "track".to_string();
    }

    // Header values stay reasonable even for run-on upstream titles.
    trimmed.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    #[test]
    fn ensure_not_root_allows_unprivileged_uid() {
        let uid = Uid::from_raw(1000);
        assert!(ensure_not_root_for(uid, "tester").is_ok());
    }

    #[test]
    fn ensure_not_root_rejects_root_uid() {
        let uid = Uid::from_raw(0);
        let err = ensure_not_root_for(uid, "tester").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }

    #[test]
    fn sanitize_filename_strips_separators_and_quotes() {
        assert_eq!(sanitize_filename("a/b\\c\"d"), "a b c d");
    }

    #[test]
    fn sanitize_filename_collapses_whitespace() {
        assert_eq!(sanitize_filename("  Tum   Hi \t Ho "), "Tum Hi Ho");
    }

    #[test]
    fn sanitize_filename_never_empty() {
        assert_eq!(sanitize_filename("///"), "track");
        assert_eq!(sanitize_filename(""), "track");
        assert_eq!(sanitize_filename("..."), "track");
    }

    #[test]
    fn sanitize_filename_truncates_long_titles() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).chars().count(), 120);
    }
}
