//! Deterministic identities for logical instances.
//!
//! An identity is the SHA-256 hex digest of a signature built from a type tag,
//! the positional construction arguments and the named construction arguments.
//! The signature format is a persisted cache key: changing delimiters or
//! ordering orphans every checkpoint written by earlier runs.
//!
//! Arguments are rendered with [`Display`], so two values with the same display
//! string produce the same identity (e.g. `1` and `"1"`).

use std::fmt::{self, Display};

use sha2::{Digest, Sha256};

const ARG_DELIMITER: &str = ";;";
const SEGMENT_DELIMITER: &str = ";;;";
const NO_ARGS: &str = "<no_args>";
const NO_NAMED: &str = "<no_kwargs>";

/// Construction arguments of a logical instance, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityArgs {
    type_tag: String,
    positional: Vec<String>,
    named: Vec<(String, String)>,
}

impl IdentityArgs {
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            positional: Vec::new(),
            named: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Display) -> Self {
        self.positional.push(value.to_string());
        self
    }

    /// Append a named argument. Order of insertion is part of the signature.
    pub fn named(mut self, key: impl Display, value: impl Display) -> Self {
        self.named.push((key.to_string(), value.to_string()));
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Render the canonical signature, e.g. `SomeClass;;;1;;2;;;key=value`.
    pub fn signature(&self) -> String {
        let positional = if self.positional.is_empty() {
            NO_ARGS.to_string()
        } else {
            self.positional.join(ARG_DELIMITER)
        };
        let named = if self.named.is_empty() {
            NO_NAMED.to_string()
        } else {
            self.named
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(ARG_DELIMITER)
        };
        [self.type_tag.as_str(), &positional, &named].join(SEGMENT_DELIMITER)
    }

    pub fn identity(&self) -> Identity {
        Identity::from_signature(&self.signature())
    }
}

/// Stable 64-char lowercase hex key for a logical instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    pub fn from_signature(signature: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(signature.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shorthand for `IdentityArgs` with positional arguments only.
pub fn derive<I, V>(type_tag: &str, positional: I) -> Identity
where
    I: IntoIterator<Item = V>,
    V: Display,
{
    positional
        .into_iter()
        .fold(IdentityArgs::new(type_tag), |args, value| args.arg(value))
        .identity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_without_arguments_uses_sentinels() {
        let args = IdentityArgs::new("SomeClass");
        assert_eq!(args.signature(), "SomeClass;;;<no_args>;;;<no_kwargs>");
    }

    #[test]
    fn signature_joins_positional_and_named() {
        let args = IdentityArgs::new("SomeClass")
            .arg(1)
            .arg(2)
            .arg(3)
            .named("key1", "value1")
            .named("key2", "value2");
        assert_eq!(
            args.signature(),
            "SomeClass;;;1;;2;;3;;;key1=value1;;key2=value2"
        );
    }

    #[test]
    fn identity_matches_known_vectors() {
        let cases = [
            (
                IdentityArgs::new("SomeClass"),
                "5e132cc9e554c17346a190b6b97ce64f7a3f8e4570e5404f76ab06773885bb09",
            ),
            (
                IdentityArgs::new("SomeClass").arg(1).arg(2).arg(3),
                "d846994a24f5c07c3e65a9be30e06314feae2db268920b7228169f1c7118029a",
            ),
            (
                IdentityArgs::new("SomeClass")
                    .named("key1", "value1")
                    .named("key2", "value2"),
                "84b373381e136591a5f1d1d9be7ec8d088ae22a6181db475092e2347e6efa95a",
            ),
            (
                IdentityArgs::new("SomeClass")
                    .arg(1)
                    .arg(2)
                    .arg(3)
                    .named("key1", "value1")
                    .named("key2", "value2"),
                "89d478b3e774453d3d6dda465d04767951c4a7f22996a4bbc692e353de7f3735",
            ),
        ];
        for (args, expected) in cases {
            assert_eq!(args.identity().as_str(), expected, "{}", args.signature());
        }
    }

    #[test]
    fn identity_is_deterministic() {
        let a = IdentityArgs::new("Trainer").arg("mnist").named("epochs", 10);
        let b = IdentityArgs::new("Trainer").arg("mnist").named("epochs", 10);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().as_str().len(), 64);
    }

    #[test]
    fn identity_changes_with_arguments() {
        let base = IdentityArgs::new("Trainer").arg("mnist");
        assert_ne!(base.identity(), base.clone().arg(2).identity());
        assert_ne!(
            base.identity(),
            IdentityArgs::new("Evaluator").arg("mnist").identity()
        );
        assert_ne!(
            base.clone().named("a", 1).named("b", 2).identity(),
            base.named("b", 2).named("a", 1).identity()
        );
    }

    #[test]
    fn display_collisions_share_an_identity() {
        let number = IdentityArgs::new("Trainer").arg(1).identity();
        let text = IdentityArgs::new("Trainer").arg("1").identity();
        assert_eq!(number, text);
    }

    #[test]
    fn derive_uses_positional_arguments() {
        assert_eq!(
            derive("SomeClass", [1, 2, 3]),
            IdentityArgs::new("SomeClass").arg(1).arg(2).arg(3).identity()
        );
    }
}
