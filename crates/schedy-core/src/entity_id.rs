//! Entity ids

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("{0:?} is not of the form domain.object_id")]
    InvalidFormat(String),

    #[error("empty domain")]
    EmptyDomain,

    #[error("empty object id")]
    EmptyObjectId,

    #[error("{0:?} may only contain lowercase letters, digits and inner underscores")]
    InvalidChars(String),
}

/// `domain.object_id`, e.g. `climate.living_room`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let (domain, object_id) = (domain.into(), object_id.into());
        match (domain.is_empty(), object_id.is_empty()) {
            (true, _) => return Err(EntityIdError::EmptyDomain),
            (_, true) => return Err(EntityIdError::EmptyObjectId),
            _ => {}
        }
        for part in [&domain, &object_id] {
            if !is_slug(part) {
                return Err(EntityIdError::InvalidChars(part.clone()));
            }
        }
        if domain.contains("__") {
            return Err(EntityIdError::InvalidChars(domain));
        }
        Ok(Self { domain, object_id })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

fn is_slug(part: &str) -> bool {
    let valid = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_';
    part.chars().all(valid) && !part.starts_with('_') && !part.ends_with('_')
}

/// Turn an arbitrary name into something usable as an object id
///
/// Runs of other characters collapse into a single underscore.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => Self::new(domain, object_id),
            _ => Err(EntityIdError::InvalidFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_id() {
        let id: EntityId = "climate.living_room".parse().unwrap();
        assert_eq!(id.domain(), "climate");
        assert_eq!(id.object_id(), "living_room");
        assert_eq!(id.to_string(), "climate.living_room");
    }

    #[test]
    fn test_invalid_entity_ids() {
        assert!(matches!(
            "climate".parse::<EntityId>(),
            Err(EntityIdError::InvalidFormat(_))
        ));
        assert!(matches!(
            "a.b.c".parse::<EntityId>(),
            Err(EntityIdError::InvalidFormat(_))
        ));
        assert_eq!(
            ".living".parse::<EntityId>(),
            Err(EntityIdError::EmptyDomain)
        );
        assert!(matches!(
            "Climate.living".parse::<EntityId>(),
            Err(EntityIdError::InvalidChars(_))
        ));
        assert!(matches!(
            "climate._living".parse::<EntityId>(),
            Err(EntityIdError::InvalidChars(_))
        ));
        assert!(matches!(
            "my__domain.x".parse::<EntityId>(),
            Err(EntityIdError::InvalidChars(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let id: EntityId = "switch.heater".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"switch.heater\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Living Room"), "living_room");
        assert_eq!(slugify("  Kid's room #2 "), "kid_s_room_2");
        assert_eq!(slugify("bath"), "bath");
    }
}
