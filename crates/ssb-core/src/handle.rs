//! Account handle validation.

use std::{fmt, sync::OnceLock};

use regex::Regex;

use crate::{errors::Error, Result};

fn handle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._]+$").expect("valid handle regex"))
}

/// Check a raw handle against the platform's username rules.
///
/// Only ASCII letters, digits, periods and underscores are allowed, and the
/// handle must be non-empty after trimming. Mixed case is accepted.
pub fn validate_handle(raw: &str) -> bool {
    let trimmed = raw.trim();
    !trimmed.is_empty() && handle_re().is_match(trimmed)
}

/// A validated, lowercase account handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(String);

impl Handle {
    pub fn parse(raw: &str) -> Result<Self> {
        if !validate_handle(raw) {
            return Err(Error::InvalidHandle(raw.to_string()));
        }
        Ok(Self(raw.trim().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_platform_charset() {
        for ok in ["instagram", "Kim.Kardashian", "a_b.c", "123", "_", ".", "  natgeo  "] {
            assert!(validate_handle(ok), "{ok:?} should be valid");
        }
    }

    #[test]
    fn rejects_everything_else() {
        let bad_inputs = [
            "", "   ", "\t\n", "@instagram", "bad handle!", "a b", "na-me", "émile", "😀", "a/b",
        ];
        for bad in bad_inputs {
            assert!(!validate_handle(bad), "{bad:?} should be invalid");
        }
    }

    #[test]
    fn parse_lowercases_and_trims() {
        let h = Handle::parse(" Instagram ").unwrap();
        assert_eq!(h.as_str(), "instagram");
        assert_eq!(h.to_string(), "instagram");
    }

    #[test]
    fn parse_rejects_invalid() {
        let err = Handle::parse("bad handle!").unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(ref s) if s == "bad handle!"));
    }
}
