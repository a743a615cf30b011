//! Compact references to cataloged input.
//!
//! A blueprint is the magic `"SBP"` followed by nothing (empty input), by the
//! root struct id, or by the root id and every descendant id in pre-order
//! ("full" mode). Expanding the root through the store that produced it
//! gives back the original literal sequence.

use crate::construct::{Database, StructId, StructKind, Value};
use crate::error::{Result, StructDbError};
use crate::field::{FieldReader, FieldWriter};

pub const BLUEPRINT_MAGIC: &str = "SBP";
pub const BLUEPRINT_EXTENSION: &str = "sbp";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blueprint {
    root: Option<StructId>,
    descendants: Option<Vec<StructId>>,
}

impl Blueprint {
    pub fn empty() -> Self {
        Self::default()
    }
    pub fn new(root: StructId) -> Self {
        Self {
            root: Some(root),
            descendants: None,
        }
    }
    pub fn full(root: StructId, descendants: Vec<StructId>) -> Self {
        Self {
            root: Some(root),
            descendants: Some(descendants),
        }
    }
    /// Builds the blueprint of a kept struct, listing its descendants when `full`.
    pub fn for_struct(database: &Database, root: StructId, full: bool) -> Result<Self> {
        if full {
            Ok(Self::full(root, database.descendants(root)?))
        } else if database.get_by_id(root)?.is_some() {
            Ok(Self::new(root))
        } else {
            Err(StructDbError::out_of_range(format!("struct {} is not kept", root)))
        }
    }
    pub fn kind(&self) -> StructKind {
        StructKind::Blueprint
    }
    pub fn root(&self) -> Option<StructId> {
        self.root
    }
    pub fn descendants(&self) -> Option<&[StructId]> {
        self.descendants.as_deref()
    }
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
    pub fn is_full(&self) -> bool {
        self.descendants.is_some()
    }
    pub fn is_blueprint(bytes: &[u8]) -> bool {
        bytes.starts_with(BLUEPRINT_MAGIC.as_bytes())
    }
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = FieldWriter::new();
        writer.magic(BLUEPRINT_MAGIC);
        if let Some(root) = self.root {
            writer.field(&root)?;
            for descendant in self.descendants.iter().flatten() {
                writer.field(descendant)?;
            }
        }
        Ok(writer.into_bytes())
    }
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = FieldReader::new(bytes);
        reader.expect_magic(BLUEPRINT_MAGIC)?;
        if reader.is_exhausted() {
            return Ok(Self::empty());
        }
        let root = reader.field::<u32>()?;
        let mut descendants = Vec::new();
        while !reader.is_exhausted() {
            descendants.push(reader.field::<u32>()?);
        }
        if descendants.is_empty() {
            Ok(Self::new(root))
        } else {
            Ok(Self::full(root, descendants))
        }
    }
    /// Recursively expands the root into the literal sequence it stands for.
    /// A full blueprint must also agree with the store's view of the tree.
    pub fn expand(&self, database: &Database) -> Result<Vec<Value>> {
        let root = match self.root {
            Some(root) => root,
            None => return Ok(Vec::new()),
        };
        if let Some(descendants) = &self.descendants {
            if database.descendants(root)? != *descendants {
                return Err(StructDbError::InvalidFormat(format!(
                    "blueprint of struct {} does not match the store",
                    root
                )));
            }
        }
        database.expand(root)
    }
}
