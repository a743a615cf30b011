//! Flat field layout shared by the data, pointer and blueprint files.
//!
//! Every field is its payload followed by a four byte zero separator.
//! Integers are `u32` little endian, magic markers are raw ASCII, and lists
//! are a count field followed by their items.

use crate::construct::StructKind;
use crate::error::{Result, StructDbError};

pub const SEPARATOR: [u8; 4] = [0; 4];
pub const INTEGER_WIDTH: usize = 4;

pub trait Field: Sized {
    fn write(&self, writer: &mut FieldWriter) -> Result<()>;
    fn read(reader: &mut FieldReader<'_>) -> Result<Self>;
}

// ------------- Field Types --------------
impl Field for u32 {
    fn write(&self, writer: &mut FieldWriter) -> Result<()> {
        writer.raw(&self.to_le_bytes());
        Ok(())
    }
    fn read(reader: &mut FieldReader<'_>) -> Result<u32> {
        let payload = reader.raw(INTEGER_WIDTH)?;
        let mut word = [0u8; INTEGER_WIDTH];
        word.copy_from_slice(payload);
        Ok(u32::from_le_bytes(word))
    }
}
// literal values are widened to a full integer field on disk
impl Field for u8 {
    fn write(&self, writer: &mut FieldWriter) -> Result<()> {
        u32::from(*self).write(writer)
    }
    fn read(reader: &mut FieldReader<'_>) -> Result<u8> {
        let at = reader.position();
        let wide = u32::read(reader)?;
        u8::try_from(wide).map_err(|_| {
            StructDbError::InvalidFormat(format!("value {} at byte {} does not fit a literal", wide, at))
        })
    }
}
impl Field for StructKind {
    fn write(&self, writer: &mut FieldWriter) -> Result<()> {
        self.tag().write(writer)
    }
    fn read(reader: &mut FieldReader<'_>) -> Result<StructKind> {
        let tag = u32::read(reader)?;
        StructKind::from_tag(tag)
            .ok_or_else(|| StructDbError::InvalidFormat(format!("unknown struct kind tag {}", tag)))
    }
}
impl<F: Field> Field for Vec<F> {
    fn write(&self, writer: &mut FieldWriter) -> Result<()> {
        let count = u32::try_from(self.len())
            .map_err(|_| StructDbError::Invariant(format!("list of {} fields is too long", self.len())))?;
        count.write(writer)?;
        for item in self {
            item.write(writer)?;
        }
        Ok(())
    }
    fn read(reader: &mut FieldReader<'_>) -> Result<Vec<F>> {
        let count = u32::read(reader)? as usize;
        // every item occupies at least one integer and a separator
        if count > reader.remaining() / (INTEGER_WIDTH + SEPARATOR.len()) {
            return Err(StructDbError::InvalidFormat(format!(
                "list claims {} items but only {} bytes remain",
                count,
                reader.remaining()
            )));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(F::read(reader)?);
        }
        Ok(items)
    }
}

// ------------- Writer --------------
#[derive(Debug, Default)]
pub struct FieldWriter {
    bytes: Vec<u8>,
}
impl FieldWriter {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }
    fn raw(&mut self, payload: &[u8]) {
        self.bytes.extend_from_slice(payload);
        self.bytes.extend_from_slice(&SEPARATOR);
    }
    pub fn magic(&mut self, magic: &str) -> &mut Self {
        self.raw(magic.as_bytes());
        self
    }
    pub fn field<F: Field>(&mut self, value: &F) -> Result<&mut Self> {
        value.write(self)?;
        Ok(self)
    }
    pub fn len(&self) -> usize {
        self.bytes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ------------- Reader --------------
#[derive(Debug)]
pub struct FieldReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}
impl<'a> FieldReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }
    fn raw(&mut self, width: usize) -> Result<&'a [u8]> {
        let end = self.cursor + width + SEPARATOR.len();
        if end > self.bytes.len() {
            return Err(StructDbError::InvalidFormat(format!(
                "field at byte {} runs past the end ({} bytes)",
                self.cursor,
                self.bytes.len()
            )));
        }
        let payload = &self.bytes[self.cursor..self.cursor + width];
        if self.bytes[self.cursor + width..end] != SEPARATOR {
            return Err(StructDbError::InvalidFormat(format!(
                "missing field separator at byte {}",
                self.cursor + width
            )));
        }
        self.cursor = end;
        Ok(payload)
    }
    pub fn expect_magic(&mut self, magic: &str) -> Result<()> {
        let at = self.cursor;
        match self.raw(magic.len()) {
            Ok(found) if found == magic.as_bytes() => Ok(()),
            _ => Err(StructDbError::InvalidFormat(format!("expected magic {:?} at byte {}", magic, at))),
        }
    }
    pub fn field<F: Field>(&mut self) -> Result<F> {
        F::read(self)
    }
    pub fn position(&self) -> usize {
        self.cursor
    }
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
