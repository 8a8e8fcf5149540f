use std::str::FromStr;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::error::{LexError, Result};

pub type ClassId = u32;
pub type FieldId = u32;

/// Object identity. Always rendered in canonical lowercase hyphenated form,
/// regardless of how it was spelled in the source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid(Uuid);

impl Guid {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| LexError::Parse(format!("invalid guid '{}': {}", s, e)))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// True when `s` parses as a guid but is not already in canonical form.
    pub fn is_non_canonical(s: &str) -> bool {
        match Self::parse(s) {
            Ok(g) => g.to_string() != s,
            Err(_) => false,
        }
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for Guid {
    type Err = LexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Boolean,
    Integer,
    GenDate,
    Guid,
    Time,
    Unicode,
    String,
    MultiUnicode,
    MultiString,
    OwningAtomic,
    OwningCollection,
    OwningSequence,
    ReferenceAtomic,
    ReferenceCollection,
    ReferenceSequence,
}

impl FieldKind {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "Boolean" => Some(Self::Boolean),
            "Integer" => Some(Self::Integer),
            "GenDate" => Some(Self::GenDate),
            "Guid" => Some(Self::Guid),
            "Time" => Some(Self::Time),
            "Unicode" => Some(Self::Unicode),
            "String" => Some(Self::String),
            "MultiUnicode" => Some(Self::MultiUnicode),
            "MultiString" => Some(Self::MultiString),
            "OwningAtomic" => Some(Self::OwningAtomic),
            "OwningCollection" => Some(Self::OwningCollection),
            "OwningSequence" => Some(Self::OwningSequence),
            "ReferenceAtomic" => Some(Self::ReferenceAtomic),
            "ReferenceCollection" => Some(Self::ReferenceCollection),
            "ReferenceSequence" => Some(Self::ReferenceSequence),
            _ => None,
        }
    }

    pub fn is_owning(&self) -> bool {
        matches!(
            self,
            Self::OwningAtomic | Self::OwningCollection | Self::OwningSequence
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::ReferenceAtomic | Self::ReferenceCollection | Self::ReferenceSequence
        )
    }

    pub fn is_object(&self) -> bool {
        self.is_owning() || self.is_reference()
    }

    pub fn is_basic(&self) -> bool {
        !self.is_object()
    }

    /// Single-valued basic kinds that carry their value in a `val` attribute.
    pub fn is_basic_scalar(&self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Integer | Self::GenDate | Self::Guid | Self::Time
        )
    }

    pub fn is_multi_alternative(&self) -> bool {
        matches!(self, Self::MultiUnicode | Self::MultiString)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::OwningSequence | Self::ReferenceSequence)
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Boolean => "Boolean",
            Self::Integer => "Integer",
            Self::GenDate => "GenDate",
            Self::Guid => "Guid",
            Self::Time => "Time",
            Self::Unicode => "Unicode",
            Self::String => "String",
            Self::MultiUnicode => "MultiUnicode",
            Self::MultiString => "MultiString",
            Self::OwningAtomic => "OwningAtomic",
            Self::OwningCollection => "OwningCollection",
            Self::OwningSequence => "OwningSequence",
            Self::ReferenceAtomic => "ReferenceAtomic",
            Self::ReferenceCollection => "ReferenceCollection",
            Self::ReferenceSequence => "ReferenceSequence",
        };
        write!(f, "{}", s)
    }
}

/// Selects which fields `Catalog::fields` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKindFilter {
    All,
    /// Boolean, Integer, GenDate, Guid, Time.
    BasicScalars,
    AllBasic,
    Owning,
    Reference,
}

impl FieldKindFilter {
    pub fn matches(&self, kind: FieldKind) -> bool {
        match self {
            Self::All => true,
            Self::BasicScalars => kind.is_basic_scalar(),
            Self::AllBasic => kind.is_basic(),
            Self::Owning => kind.is_owning(),
            Self::Reference => kind.is_reference(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Owning,
    Reference,
}

impl LinkKind {
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "o" => Some(Self::Owning),
            "r" => Some(Self::Reference),
            _ => None,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Owning => "o",
            Self::Reference => "r",
        }
    }
}
