//! Author identity parsing and the authoring policies that decide which
//! author a destination change is attributed to.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// A change author in `Name <email>` form. The email is the identity key:
/// two authors with equal emails compare equal regardless of display name.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Author {
        Author {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl PartialEq for Author {
    fn eq(&self, other: &Self) -> bool {
        self.email == other.email
    }
}

impl std::hash::Hash for Author {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.email.hash(state);
    }
}

impl Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Parse the literal `Name <email>` form. The name may contain spaces; the
/// email is everything between the final angle brackets.
impl FromStr for Author {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let open = s
            .rfind('<')
            .ok_or_else(|| RelayError::Config(format!("Author '{s}' is not in 'Name <email>' form")))?;
        if !s.ends_with('>') {
            return Err(RelayError::Config(format!(
                "Author '{s}' is not in 'Name <email>' form"
            )));
        }
        let name = s[..open].trim();
        let email = &s[open + 1..s.len() - 1];
        if name.is_empty() {
            return Err(RelayError::Config(format!("Author '{s}' has an empty name")));
        }
        Ok(Author::new(name, email))
    }
}

/// How origin authors map to destination authors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthoringPolicy {
    /// Every destination change is attributed to a single configured author.
    Overwrite { author: Author },
    /// The origin author passes through unchanged.
    PassThru { default: Author },
    /// Origin authors on the allow list pass through; everyone else is
    /// attributed to the default author.
    Allowlist {
        default: Author,
        allowed: BTreeSet<String>,
    },
}

impl AuthoringPolicy {
    /// Resolve the destination author for a change authored by `origin_author`.
    pub fn resolve(&self, origin_author: &Author) -> Author {
        match self {
            AuthoringPolicy::Overwrite { author } => author.clone(),
            AuthoringPolicy::PassThru { default } => {
                if origin_author.email.is_empty() {
                    default.clone()
                } else {
                    origin_author.clone()
                }
            }
            AuthoringPolicy::Allowlist { default, allowed } => {
                if allowed.contains(&origin_author.email) {
                    origin_author.clone()
                } else {
                    default.clone()
                }
            }
        }
    }

    /// The author used when a change has no usable origin author.
    pub fn default_author(&self) -> &Author {
        match self {
            AuthoringPolicy::Overwrite { author } => author,
            AuthoringPolicy::PassThru { default } => default,
            AuthoringPolicy::Allowlist { default, .. } => default,
        }
    }
}
