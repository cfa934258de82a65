// Representation capability tags
//
// A representation names one way a data object can be accessed. The rank
// table decides how backend-native a representation is when variants are
// ordered by specificity.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SignatureError;

/// Capability tag exposed by a data object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Row iteration (lists of values in field order)
    Rows,
    /// Record iteration (field name to value maps)
    Records,
    /// Composable SQL statement
    Sql,
    /// Backend-specific representation registered by an extension
    Custom(String),
}

impl Representation {
    pub fn as_str(&self) -> &str {
        match self {
            Representation::Rows => "rows",
            Representation::Records => "records",
            Representation::Sql => "sql",
            Representation::Custom(name) => name.as_str(),
        }
    }
}

impl FromStr for Representation {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => Err(SignatureError::EmptyRepresentation),
            "rows" => Ok(Representation::Rows),
            "records" => Ok(Representation::Records),
            "sql" => Ok(Representation::Sql),
            "*" => Err(SignatureError::MalformedOperand(s.to_string())),
            other if other.ends_with("[]") => {
                Err(SignatureError::MalformedOperand(other.to_string()))
            }
            other => Ok(Representation::Custom(other.to_string())),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Representation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Representation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Precedence table used to rank signatures by specificity
///
/// Backend-native representations outrank universally available ones, so a
/// variant requiring `sql` is tried before a variant requiring `rows`.
#[derive(Debug, Clone)]
pub struct RankTable {
    ranks: HashMap<Representation, u32>,
    /// Rank for representations not listed in the table
    default_rank: u32,
}

/// Rank of the `*` wildcard
pub const WILDCARD_RANK: u32 = 0;

impl RankTable {
    pub fn new(default_rank: u32) -> Self {
        Self {
            ranks: HashMap::new(),
            default_rank,
        }
    }

    /// Set the rank of a representation, replacing any previous value
    pub fn with_rank(mut self, representation: Representation, rank: u32) -> Self {
        self.ranks.insert(representation, rank);
        self
    }

    pub fn rank(&self, representation: &Representation) -> u32 {
        self.ranks
            .get(representation)
            .copied()
            .unwrap_or(self.default_rank)
    }
}

impl Default for RankTable {
    fn default() -> Self {
        Self::new(5)
            .with_rank(Representation::Sql, 20)
            .with_rank(Representation::Rows, 10)
            .with_rank(Representation::Records, 10)
    }
}
