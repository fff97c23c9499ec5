//! Identifiers for schedulable entities and condition nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between asset key path segments in the string form.
const PATH_SEPARATOR: char = '/';

/// Separator between an asset key and a check name in the string form.
const CHECK_SEPARATOR: char = '#';

/// Key of a data-producing asset, a path of one or more segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    /// Create from path segments.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(path.into_iter().map(Into::into).collect())
    }

    /// Path segments.
    pub fn path(&self) -> &[String] {
        &self.0
    }

    /// Key of a named check targeting this asset.
    pub fn check(&self, name: impl Into<String>) -> AssetCheckKey {
        AssetCheckKey::new(self.clone(), name)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl FromStr for AssetKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.contains(CHECK_SEPARATOR) {
            return Err(KeyParseError(s.to_string()));
        }
        let path: Vec<String> = s.split(PATH_SEPARATOR).map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(KeyParseError(s.to_string()));
        }
        Ok(Self(path))
    }
}

impl TryFrom<String> for AssetKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.to_string()
    }
}

impl From<&str> for AssetKey {
    fn from(s: &str) -> Self {
        Self::new(s.split(PATH_SEPARATOR))
    }
}

/// Key of a check that evaluates one asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetCheckKey {
    /// The asset under test
    pub asset_key: AssetKey,

    /// Check name, unique per asset
    pub name: String,
}

impl AssetCheckKey {
    /// Create a new check key.
    pub fn new(asset_key: AssetKey, name: impl Into<String>) -> Self {
        Self {
            asset_key,
            name: name.into(),
        }
    }
}

impl fmt::Display for AssetCheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.asset_key, CHECK_SEPARATOR, self.name)
    }
}

impl FromStr for AssetCheckKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (asset, name) = s
            .split_once(CHECK_SEPARATOR)
            .ok_or_else(|| KeyParseError(s.to_string()))?;
        if name.is_empty() {
            return Err(KeyParseError(s.to_string()));
        }
        Ok(Self::new(asset.parse()?, name))
    }
}

impl TryFrom<String> for AssetCheckKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AssetCheckKey> for String {
    fn from(key: AssetCheckKey) -> Self {
        key.to_string()
    }
}

/// Identifies a schedulable entity: an asset or an asset check.
///
/// The two namespaces are disjoint. Ordering puts every asset before every
/// check, then compares keys, giving a deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityKey {
    /// A data-producing asset
    Asset(AssetKey),
    /// A check on an asset
    Check(AssetCheckKey),
}

impl EntityKey {
    /// Whether this is an asset key.
    pub fn is_asset(&self) -> bool {
        matches!(self, EntityKey::Asset(_))
    }

    /// The asset key, if this is an asset.
    pub fn as_asset(&self) -> Option<&AssetKey> {
        match self {
            EntityKey::Asset(key) => Some(key),
            EntityKey::Check(_) => None,
        }
    }

    /// The check key, if this is a check.
    pub fn as_check(&self) -> Option<&AssetCheckKey> {
        match self {
            EntityKey::Asset(_) => None,
            EntityKey::Check(key) => Some(key),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Asset(key) => key.fmt(f),
            EntityKey::Check(key) => key.fmt(f),
        }
    }
}

impl FromStr for EntityKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(CHECK_SEPARATOR) {
            Ok(EntityKey::Check(s.parse()?))
        } else {
            Ok(EntityKey::Asset(s.parse()?))
        }
    }
}

impl TryFrom<String> for EntityKey {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

impl From<AssetKey> for EntityKey {
    fn from(key: AssetKey) -> Self {
        EntityKey::Asset(key)
    }
}

impl From<AssetCheckKey> for EntityKey {
    fn from(key: AssetCheckKey) -> Self {
        EntityKey::Check(key)
    }
}

/// A string that is not a valid entity key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity key: {0:?}")]
pub struct KeyParseError(pub String);

/// Stable structural identifier of a condition node.
///
/// Derived from the node's kind, parameters and children's ids, never from
/// its address in memory. Used as the cursor key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(String);

impl ConditionId {
    /// Wrap a finished BLAKE3 digest.
    pub fn from_hash(hash: blake3::Hash) -> Self {
        Self(hash.to_hex().to_string())
    }

    /// Hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of this node when it is evaluated on behalf of a dependency
    /// rather than the root entity.
    pub fn scoped(&self, key: &EntityKey) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"scope:");
        hasher.update(self.0.as_bytes());
        hasher.update(b":");
        hasher.update(key.to_string().as_bytes());
        Self::from_hash(hasher.finalize())
    }

    /// Id of this node when it is nested inside a scope created by
    /// [`ConditionId::scoped`].
    pub fn within(&self, scope: &ConditionId) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"within:");
        hasher.update(scope.0.as_bytes());
        hasher.update(b":");
        hasher.update(self.0.as_bytes());
        Self::from_hash(hasher.finalize())
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_round_trips_through_strings() {
        let asset: EntityKey = AssetKey::new(["warehouse", "orders"]).into();
        let check: EntityKey = AssetKey::from("warehouse/orders").check("not_null").into();

        assert_eq!(asset.to_string(), "warehouse/orders");
        assert_eq!(check.to_string(), "warehouse/orders#not_null");
        assert_eq!("warehouse/orders".parse::<EntityKey>().unwrap(), asset);
        assert_eq!("warehouse/orders#not_null".parse::<EntityKey>().unwrap(), check);
    }

    #[test]
    fn test_assets_order_before_checks() {
        let check: EntityKey = AssetKey::from("a").check("c").into();
        let asset: EntityKey = AssetKey::from("z").into();
        assert!(asset < check);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        assert!("".parse::<EntityKey>().is_err());
        assert!("a//b".parse::<EntityKey>().is_err());
        assert!("a#".parse::<EntityKey>().is_err());
    }

    #[test]
    fn test_entity_key_serializes_as_string() {
        let key: EntityKey = AssetKey::from("a/b").into();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"a/b\"");
        let back: EntityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_scoped_id_differs_per_key() {
        let id = ConditionId::from_hash(blake3::hash(b"x"));
        let a = id.scoped(&AssetKey::from("a").into());
        let b = id.scoped(&AssetKey::from("b").into());
        assert_ne!(a, b);
        assert_eq!(a, id.scoped(&AssetKey::from("a").into()));
        assert_ne!(id.within(&a), id.within(&b));
        assert_ne!(id.within(&a), id);
    }
}
