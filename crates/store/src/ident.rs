//! Strict identifier validation for dynamic query building.
//!
//! Any table/column name spliced into SQL text (dynamic `SELECT` lists,
//! `ORDER BY` columns) must pass the whitelist first; bind parameters
//! cover everything else.

use regex::Regex;
use std::sync::OnceLock;

use relay_domain::{Error, Result};

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("static regex"))
}

/// Validate one SQL identifier. Lowercase snake-case only, max 63 chars.
pub fn validate(name: &str) -> Result<&str> {
    if ident_re().is_match(name) {
        Ok(name)
    } else {
        Err(Error::Other(format!("invalid sql identifier: {name:?}")))
    }
}

/// Build a validated `ORDER BY` clause fragment.
pub fn order_by(column: &str, descending: bool) -> Result<String> {
    let column = validate(column)?;
    Ok(format!(
        "ORDER BY {column} {}",
        if descending { "DESC" } else { "ASC" }
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_snake_case() {
        assert!(validate("created_at").is_ok());
        assert!(validate("_private").is_ok());
        assert!(validate("t2").is_ok());
    }

    #[test]
    fn rejects_injection_shapes() {
        assert!(validate("created_at; DROP TABLE messages").is_err());
        assert!(validate("created_at--").is_err());
        assert!(validate("\"quoted\"").is_err());
        assert!(validate("CamelCase").is_err());
        assert!(validate("").is_err());
        assert!(validate("1starts_with_digit").is_err());
        assert!(validate(&"a".repeat(64)).is_err());
    }

    #[test]
    fn order_by_fragment() {
        assert_eq!(order_by("created_at", false).unwrap(), "ORDER BY created_at ASC");
        assert_eq!(order_by("sequence", true).unwrap(), "ORDER BY sequence DESC");
        assert!(order_by("x; --", true).is_err());
    }
}
