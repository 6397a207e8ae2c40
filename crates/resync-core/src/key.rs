use serde::{Deserialize, Serialize};
use std::{convert::Infallible, fmt, str::FromStr};

/// Separator used by the textual form of a [`CacheKey`].
pub const KEY_SEPARATOR: char = '/';

/// A single primitive component of a [`CacheKey`].
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// Boolean flag component (e.g. `published`).
    Bool(bool),
    /// Integer component (e.g. a numeric owner id or page number).
    Int(i64),
    /// Free-form text component (e.g. a resource name or external id).
    Text(String),
}

impl KeyPart {
    /// Borrow the text of a [`KeyPart::Text`] component.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Bool(_) | Self::Int(_) => None,
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => value.fmt(f),
            Self::Int(value) => value.fmt(f),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl FromStr for KeyPart {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(value) = s.parse::<bool>() {
            return Ok(Self::Bool(value));
        }
        if let Ok(value) = s.parse::<i64>() {
            return Ok(Self::Int(value));
        }
        Ok(Self::Text(s.to_owned()))
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Structural identifier of a cached resource collection.
///
/// Keys are ordered tuples of primitive parts, conventionally starting with
/// the resource name followed by owner or filter components:
///
/// ```
/// use resync_core::CacheKey;
///
/// let key = CacheKey::resource("payment-methods").with("cus_1");
/// assert_eq!(key.to_string(), "payment-methods/cus_1");
/// assert_eq!(key, "payment-methods/cus_1".parse::<CacheKey>().unwrap());
/// ```
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
    /// Build a key from arbitrary parts.
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Key consisting of a single resource name.
    pub fn resource(name: impl Into<String>) -> Self {
        Self(vec![KeyPart::Text(name.into())])
    }

    /// Append a part, returning the extended key.
    #[must_use]
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Components of the key in order.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Leading resource name, when the first part is text.
    #[must_use]
    pub fn resource_name(&self) -> Option<&str> {
        self.0.first().and_then(KeyPart::as_text)
    }

    /// Returns true when `prefix` matches the leading parts of this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, "{KEY_SEPARATOR}")?;
            }
            part.fmt(f)?;
        }
        Ok(())
    }
}

impl FromStr for CacheKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(KEY_SEPARATOR)
            .filter(|part| !part.is_empty())
            .map(|part| match part.parse::<KeyPart>() {
                Ok(parsed) => parsed,
                Err(never) => match never {},
            })
            .collect();
        Ok(Self(parts))
    }
}

impl<P: Into<KeyPart>> FromIterator<P> for CacheKey {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_is_structural() {
        let a = CacheKey::resource("reviews").with(7_i64).with(true);
        let b = CacheKey::new([KeyPart::from("reviews"), KeyPart::Int(7), KeyPart::Bool(true)]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn parts_of_different_type_do_not_collide() {
        let text = CacheKey::resource("tutors").with("7");
        let int = CacheKey::resource("tutors").with(7_i64);
        assert_ne!(text, int);
        assert_eq!(text.to_string(), int.to_string());
    }

    #[test]
    fn parse_infers_primitive_types() {
        let Ok(key) = "referrals/42/true/abc".parse::<CacheKey>();
        assert_eq!(
            key.parts(),
            &[
                KeyPart::Text("referrals".into()),
                KeyPart::Int(42),
                KeyPart::Bool(true),
                KeyPart::Text("abc".into()),
            ]
        );
        assert_eq!(key.resource_name(), Some("referrals"));
    }

    #[test]
    fn parse_skips_empty_segments() {
        let Ok(key) = "/payment-methods//cus_1/".parse::<CacheKey>();
        assert_eq!(key.to_string(), "payment-methods/cus_1");
    }

    #[test]
    fn prefix_matching() {
        let collection = CacheKey::resource("ai-tutors");
        let owned = collection.clone().with("user-1");
        assert!(owned.starts_with(&collection));
        assert!(!collection.starts_with(&owned));
        assert!(CacheKey::default().is_empty());
    }

    #[test]
    fn serializes_as_plain_array() -> Result<(), serde_json::Error> {
        let key = CacheKey::resource("bookings").with(3_i64).with(false);
        let json = serde_json::to_string(&key)?;
        assert_eq!(json, r#"["bookings",3,false]"#);
        let back: CacheKey = serde_json::from_str(&json)?;
        assert_eq!(back, key);
        Ok(())
    }
}
