//! Player Identity
//!
//! Remote players identify themselves with an email-shaped id. The server
//! checks the shape only; nothing is verified against an external provider.

use thiserror::Error;

use crate::game::entity::PlayerId;

/// Longest accepted id (RFC 5321 path limit).
pub const MAX_ID_LEN: usize = 254;

/// Why an id was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Empty string
    #[error("player id is empty")]
    Empty,
    /// Longer than [`MAX_ID_LEN`]
    #[error("player id is longer than 254 characters")]
    TooLong,
    /// Contains whitespace or control characters
    #[error("player id contains whitespace")]
    Whitespace,
    /// Not `local@domain.tld`
    #[error("player id `{0}` is not an email address")]
    NotEmail(String),
}

/// Validate an email-shaped player id.
///
/// Accepts `local@domain` with exactly one `@`, a non-empty local part, and
/// a domain containing a dot that is neither its first nor last character.
pub fn parse_player_id(raw: &str) -> Result<PlayerId, IdentityError> {
    if raw.is_empty() {
        return Err(IdentityError::Empty);
    }
    if raw.len() > MAX_ID_LEN {
        return Err(IdentityError::TooLong);
    }
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdentityError::Whitespace);
    }

    let not_email = || IdentityError::NotEmail(raw.to_string());
    let (local, domain) = raw.split_once('@').ok_or_else(not_email)?;
    if local.is_empty() || domain.contains('@') {
        return Err(not_email());
    }
    let dot_inside = domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
    if !dot_inside || domain.starts_with('.') || domain.ends_with('.') {
        return Err(not_email());
    }

    Ok(PlayerId::new(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["bot@arena.dev", "first.last+tag@mail.example.co.uk", "x@y.z"] {
            assert_eq!(parse_player_id(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn test_invalid_ids() {
        assert_eq!(parse_player_id(""), Err(IdentityError::Empty));
        assert_eq!(parse_player_id("a b@c.d"), Err(IdentityError::Whitespace));
        for id in ["noat", "@domain.cz", "a@b", "a@.cz", "a@cz.", "a@b@c.cz"] {
            assert!(
                matches!(parse_player_id(id), Err(IdentityError::NotEmail(_))),
                "{} should be rejected",
                id
            );
        }
        let long = format!("{}@x.io", "a".repeat(MAX_ID_LEN));
        assert_eq!(parse_player_id(&long), Err(IdentityError::TooLong));
    }
}
