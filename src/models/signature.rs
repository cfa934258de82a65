// Operation signatures
//
// A signature lists, per dispatch argument, the representation a variant
// requires. `rows` requires a single object, `rows[]` a list whose every
// element supports `rows`, and `*` / `*[]` accept anything of that shape.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::representation::{RankTable, Representation, WILDCARD_RANK};
use crate::error::SignatureError;
use crate::objects::Argument;

/// One argument slot of a signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    /// Required representation, `None` for the `*` wildcard
    pub representation: Option<Representation>,
    pub is_list: bool,
}

impl Operand {
    /// Static check against an actual argument
    pub fn is_satisfied_by(&self, argument: &Argument) -> bool {
        if self.is_list != argument.is_list() {
            return false;
        }
        match &self.representation {
            None => true,
            Some(rep) => argument.supports(rep),
        }
    }

    /// Match against another operand, treating `self` as the pattern
    fn accepts(&self, other: &Operand) -> bool {
        if self.is_list != other.is_list {
            return false;
        }
        match &self.representation {
            None => true,
            Some(rep) => other.representation.as_ref() == Some(rep),
        }
    }

    fn rank(&self, table: &RankTable) -> u32 {
        self.representation
            .as_ref()
            .map(|rep| table.rank(rep))
            .unwrap_or(WILDCARD_RANK)
    }
}

impl FromStr for Operand {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (tag, is_list) = match s.strip_suffix("[]") {
            Some(tag) => (tag, true),
            None => (s, false),
        };

        if tag.is_empty() {
            return Err(SignatureError::EmptyRepresentation);
        }
        if tag.contains('[') || tag.contains(']') || tag.contains(',') {
            return Err(SignatureError::MalformedOperand(s.to_string()));
        }

        let representation = if tag == "*" { None } else { Some(tag.parse()?) };

        Ok(Self {
            representation,
            is_list,
        })
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.representation {
            Some(rep) => write!(f, "{}", rep)?,
            None => f.write_str("*")?,
        }
        if self.is_list {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

/// Ordered list of operands a variant requires
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    operands: Vec<Operand>,
}

impl Signature {
    pub fn new(operands: Vec<Operand>) -> Self {
        Self { operands }
    }

    /// Parse a signature from representation strings such as `["sql[]", "rows"]`
    pub fn parse<S: AsRef<str>>(reps: &[S]) -> Result<Self, SignatureError> {
        let operands = reps
            .iter()
            .map(|rep| rep.as_ref().parse())
            .collect::<Result<Vec<Operand>, _>>()?;
        Ok(Self { operands })
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    /// True when every slot is supported by the corresponding argument
    pub fn is_satisfied_by(&self, args: &[Argument]) -> bool {
        self.operands.len() == args.len()
            && self
                .operands
                .iter()
                .zip(args)
                .all(|(operand, arg)| operand.is_satisfied_by(arg))
    }

    /// Match against a tuple of representation strings
    ///
    /// `rep` matches `rep` and `*`, `rep[]` matches `rep[]` and `*[]`.
    pub fn matches<S: AsRef<str>>(&self, reps: &[S]) -> bool {
        if reps.len() != self.operands.len() {
            return false;
        }
        self.operands.iter().zip(reps).all(|(mine, theirs)| {
            theirs
                .as_ref()
                .parse::<Operand>()
                .map(|theirs| mine.accepts(&theirs))
                .unwrap_or(false)
        })
    }

    /// Same shape with every representation replaced by `*`
    pub fn as_prototype(&self) -> Signature {
        let operands = self
            .operands
            .iter()
            .map(|op| Operand {
                representation: None,
                is_list: op.is_list,
            })
            .collect();
        Signature { operands }
    }

    /// Combined representation rank, higher is more specific
    pub fn specificity(&self, table: &RankTable) -> u32 {
        self.operands.iter().map(|op| op.rank(table)).sum()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.operands.iter().map(|op| op.to_string()).collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join(", "))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_strings().serialize(serializer)
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    /// Parse a comma separated signature such as `"sql[], rows"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Signature::new(Vec::new()));
        }
        let parts: Vec<&str> = s.split(',').collect();
        Signature::parse(&parts)
    }
}
