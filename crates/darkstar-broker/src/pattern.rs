use std::fmt;

use crate::error::{BrokerError, Result};

/// Which keys of a table a subscription wants to see.
///
/// Textual form: `*` matches every key, `prefix*` matches keys starting with
/// `prefix`, anything else matches one key exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl KeyPattern {
    /// Parse the textual form. A `*` is only allowed as the final character.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(Self::Any);
        }
        let (body, wildcard) = match pattern.strip_suffix('*') {
            Some(body) => (body, true),
            None => (pattern, false),
        };
        if body.contains('*') {
            return Err(BrokerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "'*' may only appear at the end".into(),
            });
        }
        if body.is_empty() {
            return Err(BrokerError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern must not be empty".into(),
            });
        }
        Ok(if wildcard {
            Self::Prefix(body.to_string())
        } else {
            Self::Exact(body.to_string())
        })
    }

    pub fn exact(key: impl Into<String>) -> Self {
        Self::Exact(key.into())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
            Self::Exact(exact) => key == exact,
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Exact(exact) => write!(f, "{exact}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_forms() {
        assert_eq!(KeyPattern::parse("*").unwrap(), KeyPattern::Any);
        assert_eq!(
            KeyPattern::parse("listing-*").unwrap(),
            KeyPattern::Prefix("listing-".into())
        );
        assert_eq!(
            KeyPattern::parse("listing-1").unwrap(),
            KeyPattern::Exact("listing-1".into())
        );
    }

    #[test]
    fn parse_rejects_inner_wildcard() {
        assert!(matches!(
            KeyPattern::parse("a*b"),
            Err(BrokerError::InvalidPattern { .. })
        ));
        assert!(KeyPattern::parse("").is_err());
    }

    #[test]
    fn exact_does_not_match_prefix() {
        let p = KeyPattern::exact("abc");
        assert!(p.matches("abc"));
        assert!(!p.matches("abcd"));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for text in ["*", "p-*", "p-1"] {
            assert_eq!(KeyPattern::parse(text).unwrap().to_string(), text);
        }
    }

    proptest! {
        #[test]
        fn prefix_matches_any_extension(prefix in "[a-z0-9-]{1,8}", rest in "[a-z0-9-]{0,8}") {
            let pattern = KeyPattern::parse(&format!("{prefix}*")).unwrap();
            let key = format!("{prefix}{rest}");
            prop_assert!(pattern.matches(&key));
        }

        #[test]
        fn any_matches_everything(key in ".{0,16}") {
            prop_assert!(KeyPattern::Any.matches(&key));
        }
    }
}
