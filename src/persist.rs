// used for persistence
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::construct::{Struct, StructId, StructKind, Value};
use crate::error::{Result, StructDbError};
use crate::field::{Field, FieldReader, FieldWriter};

pub const DATA_MAGIC: &str = "SDB";
pub const POINTER_MAGIC: &str = "SDBP";
pub const DATA_FILE_NAME: &str = "database.sdb";
pub const POINTER_FILE_NAME: &str = "pointers.sdbp";

// ------------- Pointer -------------
// Where the record of one struct starts in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    struct_id: StructId,
    offset: u32,
}
impl Pointer {
    pub fn new(struct_id: StructId, offset: u32) -> Self {
        Self { struct_id, offset }
    }
    pub fn struct_id(&self) -> StructId {
        self.struct_id
    }
    pub fn offset(&self) -> u32 {
        self.offset
    }
}
impl Field for Pointer {
    fn write(&self, writer: &mut FieldWriter) -> Result<()> {
        writer.field(&self.struct_id)?.field(&self.offset)?;
        Ok(())
    }
    fn read(reader: &mut FieldReader<'_>) -> Result<Pointer> {
        let struct_id = reader.field::<u32>()?;
        let offset = reader.field::<u32>()?;
        Ok(Pointer { struct_id, offset })
    }
}

// ------------- Records -------------
// id, children, kind, literal values, base
pub fn encode_record(kept: &Struct, writer: &mut FieldWriter) -> Result<()> {
    if kept.kind() == StructKind::Blueprint {
        return Err(StructDbError::Invariant(format!("struct {} is a blueprint reference", kept.id())));
    }
    writer
        .field(&kept.id())?
        .field(&kept.children().to_vec())?
        .field(&kept.kind())?
        .field(&kept.values().to_vec())?
        .field(&kept.base())?;
    Ok(())
}

// Children are left as raw ids; they are resolved once every record is read.
pub fn decode_record(bytes: &[u8]) -> Result<Struct> {
    let mut reader = FieldReader::new(bytes);
    let id = reader.field::<u32>()?;
    let children = reader.field::<Vec<StructId>>()?;
    let kind = reader.field::<StructKind>()?;
    let values = reader.field::<Vec<Value>>()?;
    let base = reader.field::<u32>()?;
    if !reader.is_exhausted() {
        return Err(StructDbError::InvalidFormat(format!(
            "record {} has {} trailing bytes",
            id,
            reader.remaining()
        )));
    }
    if kind == StructKind::Blueprint {
        return Err(StructDbError::InvalidFormat(format!("record {} is a blueprint reference", id)));
    }
    Ok(Struct::restored(id, kind, children, values, base))
}

// Returns the data file and the pointer file for structs in ascending id order.
pub fn to_disk(structs: &[Arc<Struct>]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut data = FieldWriter::new();
    data.magic(DATA_MAGIC);
    let mut pointers = FieldWriter::new();
    pointers.magic(POINTER_MAGIC);
    for (position, kept) in structs.iter().enumerate() {
        if kept.id() as usize != position {
            return Err(StructDbError::Invariant(format!(
                "struct {} stored at position {}",
                kept.id(),
                position
            )));
        }
        // the next byte will be the start of this struct's record
        let offset = u32::try_from(data.len())
            .map_err(|_| StructDbError::Invariant("data file exceeds the pointer range".into()))?;
        pointers.field(&Pointer::new(kept.id(), offset))?;
        encode_record(kept, &mut data)?;
    }
    Ok((data.into_bytes(), pointers.into_bytes()))
}

pub fn from_disk(data: &[u8], pointers: &[u8]) -> Result<Vec<Struct>> {
    let mut header = FieldReader::new(data);
    header.expect_magic(DATA_MAGIC)?;
    let records_start = header.position();

    let mut pointer_reader = FieldReader::new(pointers);
    pointer_reader.expect_magic(POINTER_MAGIC)?;
    let mut parsed = Vec::new();
    while !pointer_reader.is_exhausted() {
        parsed.push(pointer_reader.field::<Pointer>()?);
    }
    if parsed.is_empty() && data.len() > records_start {
        return Err(StructDbError::InvalidFormat("records present without pointers".into()));
    }

    let mut records = Vec::with_capacity(parsed.len());
    for (position, pointer) in parsed.iter().enumerate() {
        if pointer.struct_id as usize != position {
            return Err(StructDbError::InvalidFormat(format!(
                "pointer for struct {} found at position {}",
                pointer.struct_id, position
            )));
        }
        let start = pointer.offset as usize;
        let end = match parsed.get(position + 1) {
            Some(next) => next.offset as usize,
            None => data.len(),
        };
        if start < records_start || start > end || end > data.len() {
            return Err(StructDbError::out_of_range(format!(
                "pointer for struct {} spans bytes {}..{} of {}",
                pointer.struct_id,
                start,
                end,
                data.len()
            )));
        }
        let record = decode_record(&data[start..end])?;
        if record.id() != pointer.struct_id {
            return Err(StructDbError::InvalidFormat(format!(
                "pointer for struct {} leads to record {}",
                pointer.struct_id,
                record.id()
            )));
        }
        records.push(record);
    }

    // now that every record is read, every child id must name one of them
    let count = records.len();
    for record in &records {
        for child in record.children() {
            if *child as usize >= count || *child >= record.id() {
                return Err(StructDbError::out_of_range(format!(
                    "child {} of struct {} is outside the {} stored structs",
                    child,
                    record.id(),
                    count
                )));
            }
        }
        if record.base() as usize >= count {
            return Err(StructDbError::out_of_range(format!(
                "base {} of struct {} is outside the {} stored structs",
                record.base(),
                record.id(),
                count
            )));
        }
    }
    Ok(records)
}

// ------------- Persistence -------------
#[derive(Debug)]
pub struct Persistor {
    directory: PathBuf,
    data_path: PathBuf,
    pointer_path: PathBuf,
}
impl Persistor {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Persistor {
            data_path: directory.join(DATA_FILE_NAME),
            pointer_path: directory.join(POINTER_FILE_NAME),
            directory,
        })
    }
    pub fn directory(&self) -> &Path {
        &self.directory
    }
    // A missing or empty data file means a fresh store.
    pub fn restore(&self) -> Result<Option<Vec<Struct>>> {
        let data = match read_optional(&self.data_path)? {
            Some(data) if !data.is_empty() => data,
            _ => return Ok(None),
        };
        let pointers = match read_optional(&self.pointer_path)? {
            Some(pointers) if !pointers.is_empty() => pointers,
            _ => {
                return Err(StructDbError::InvalidFormat(format!(
                    "{} exists but {} is missing",
                    self.data_path.display(),
                    self.pointer_path.display()
                )));
            }
        };
        let records = from_disk(&data, &pointers)?;
        debug!(records = records.len(), "restored struct records");
        Ok(Some(records))
    }
    // Both files are staged before either replaces the previous snapshot.
    pub fn save(&self, structs: &[Arc<Struct>]) -> Result<()> {
        let (data, pointers) = to_disk(structs)?;
        let data_staging = stage(&self.data_path, &data)?;
        let pointer_staging = match stage(&self.pointer_path, &pointers) {
            Ok(staging) => staging,
            Err(e) => {
                discard(&data_staging);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&data_staging, &self.data_path) {
            discard(&data_staging);
            discard(&pointer_staging);
            return Err(e.into());
        }
        fs::rename(&pointer_staging, &self.pointer_path)?;
        info!(
            structs = structs.len(),
            data_bytes = data.len(),
            pointer_bytes = pointers.len(),
            path = %self.data_path.display(),
            "saved struct store"
        );
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let staging = path.with_extension("tmp");
    fs::write(&staging, bytes)?;
    Ok(staging)
}

fn discard(staging: &Path) {
    if let Err(e) = fs::remove_file(staging) {
        warn!(path = %staging.display(), error = %e, "could not remove staged file");
    }
}
