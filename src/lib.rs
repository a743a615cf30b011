//! StructDB – a dictionary based grammar compression engine.
//!
//! Input is a sequence of literal values (bits or bytes). Cataloging rewrites
//! it as a tree of *structs* held in a shared, deduplicated store:
//! * A leaf [`construct::Struct`] holds literal values (one alphabet symbol).
//! * A composite [`construct::Struct`] holds an ordered list of child ids, every
//!   child id being smaller than its owner's id.
//! * A [`blueprint::Blueprint`] names the root struct of one cataloged input
//!   and is all that needs to be kept to get the input back.
//!
//! Structs are owned and deduplicated by a "keeper" (see the `construct`
//! module): the same children sequence is only ever kept once, so repeated
//! input makes the store grow less and less.
//!
//! ## Modules
//! * [`construct`] – Structs, the keeper, the lookup cache and the [`construct::Database`].
//! * [`field`] – The flat field layout used by every file, as a [`field::Field`] trait.
//! * [`persist`] – The `SDB` data file and `SDBP` pointer file.
//! * [`blueprint`] – The `SBP` blueprint codec and its expansion.
//! * [`catalog`] – Tokenizer and reducer, the [`catalog::Catalog`] engine.
//! * [`settings`] – INI and environment settings for the command line tool.
//! * [`interface`] – File level driver used by the command line tool.
//!
//! ## Persistence
//! A [`construct::Database`] is either in memory or backed by a directory. A
//! directory backed store is restored on open, and every flush reindexes the
//! structs by ascending span before writing both files.
//!
//! ## Quick Start
//! ```
//! use structdb::construct::{Database, PersistenceMode};
//! use structdb::catalog::{Catalog, Granularity};
//! let db = Database::new(PersistenceMode::InMemory).unwrap();
//! let mut catalog = Catalog::new(&db, Granularity::Byte);
//! let blueprint = catalog.catalog(b"ABAB").unwrap();
//! assert_eq!(blueprint.expand(&db).unwrap(), b"ABAB".to_vec());
//! ```

pub mod blueprint;
pub mod catalog;
pub mod construct;
pub mod error;
pub mod field;
pub mod interface;
pub mod persist;
pub mod settings;

pub use error::{Result, StructDbError};
