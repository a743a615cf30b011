use std::sync::{Arc, Mutex, RwLock};

// other keepers use HashMap with a fast hasher
use core::hash::{BuildHasherDefault, Hash, Hasher};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use seahash::SeaHasher;

// recently used children lookups
use lru::LruCache;

// read-only scans run on the worker pool
use rayon::prelude::*;

// used to print out readable forms of a construct
use std::fmt;

use tracing::{debug, info};

// our own stuff that we need
use crate::blueprint::Blueprint;
use crate::error::{Result, StructDbError};
use crate::persist::Persistor;

// ------------- Identities -------------
pub type StructId = u32;
// one bit or one byte, depending on the granularity of the input
pub type Value = u8;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// marks a struct that has not been kept yet, or a slot dropped by a reindex
pub const UNASSIGNED: StructId = StructId::MAX;
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

// ------------- StructKind -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructKind {
    Leaf,
    Composite,
    // only ever used for output references, never kept
    Blueprint,
}
impl StructKind {
    pub fn tag(&self) -> u32 {
        match self {
            StructKind::Leaf => 0,
            StructKind::Composite => 1,
            StructKind::Blueprint => 2,
        }
    }
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(StructKind::Leaf),
            1 => Some(StructKind::Composite),
            2 => Some(StructKind::Blueprint),
            _ => None,
        }
    }
}
impl fmt::Display for StructKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StructKind::Leaf => write!(f, "leaf"),
            StructKind::Composite => write!(f, "composite"),
            StructKind::Blueprint => write!(f, "blueprint"),
        }
    }
}

// ------------- Struct -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Struct {
    id: StructId,
    kind: StructKind,
    children: Vec<StructId>,
    values: Vec<Value>, // literal values, only for leaves
    base: StructId,     // the alphabet leaf this struct descends from
    span: usize,        // length of the flattened values, never persisted
}

impl Struct {
    pub fn leaf(values: Vec<Value>) -> Self {
        Self {
            id: UNASSIGNED,
            kind: StructKind::Leaf,
            children: Vec::new(),
            values,
            base: UNASSIGNED,
            span: 0,
        }
    }
    pub fn composite(children: Vec<StructId>) -> Self {
        Self {
            id: UNASSIGNED,
            kind: StructKind::Composite,
            children,
            values: Vec::new(),
            base: UNASSIGNED,
            span: 0,
        }
    }
    // A struct as read back from disk, before its span is known.
    pub(crate) fn restored(
        id: StructId,
        kind: StructKind,
        children: Vec<StructId>,
        values: Vec<Value>,
        base: StructId,
    ) -> Self {
        Self {
            id,
            kind,
            children,
            values,
            base,
            span: 0,
        }
    }
    // Structs are only given an identity by the keeper, and are
    // immutable from then on, hence getters only.
    pub fn id(&self) -> StructId {
        self.id
    }
    pub fn kind(&self) -> StructKind {
        self.kind
    }
    pub fn children(&self) -> &[StructId] {
        &self.children
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn base(&self) -> StructId {
        self.base
    }
    pub fn span(&self) -> usize {
        self.span
    }
    pub fn is_leaf(&self) -> bool {
        self.kind == StructKind::Leaf
    }
    pub fn is_composite(&self) -> bool {
        self.kind == StructKind::Composite
    }
    fn with_identity(mut self, id: StructId, base: StructId, span: usize) -> Self {
        self.id = id;
        self.base = base;
        self.span = span;
        self
    }
}
impl fmt::Display for Struct {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            StructKind::Leaf => write!(f, "#{} leaf {:?}", self.id, self.values),
            _ => write!(f, "#{} {} {:?}", self.id, self.kind, self.children),
        }
    }
}

// ------------- StructKeeper -------------
// Owns every struct in an arena indexed by id. Children are ids of earlier
// slots, so the graph is acyclic by construction.
#[derive(Debug, Default)]
pub struct StructKeeper {
    kept: Vec<Option<Arc<Struct>>>,
    children_lookup: HashMap<Vec<StructId>, StructId, OtherHasher>,
    leaf_lookup: HashMap<Vec<Value>, StructId, OtherHasher>,
    // slots below this were saved and keep their ids for good
    settled: usize,
    // bumped whenever a reindex renumbers anything
    generation: u64,
}
impl StructKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn slots(&self) -> &[Option<Arc<Struct>>] {
        &self.kept
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Struct>> {
        self.kept.iter().flatten()
    }
    pub fn get(&self, id: StructId) -> Option<Arc<Struct>> {
        self.kept.get(id as usize).and_then(|slot| slot.clone())
    }
    pub fn lookup_children(&self, children: &[StructId]) -> Option<StructId> {
        self.children_lookup.get(children).copied()
    }
    pub fn lookup_leaf(&self, values: &[Value]) -> Option<StructId> {
        self.leaf_lookup.get(values).copied()
    }
    pub fn settled(&self) -> usize {
        self.settled
    }
    pub fn generation(&self) -> u64 {
        self.generation
    }
    fn next_id(&self) -> Result<StructId> {
        match StructId::try_from(self.kept.len()) {
            Ok(id) if id != UNASSIGNED => Ok(id),
            _ => Err(StructDbError::Invariant("struct id space exhausted".into())),
        }
    }
    pub fn reserve(&mut self) -> Result<StructId> {
        let id = self.next_id()?;
        self.kept.push(None);
        Ok(id)
    }
    fn previously_kept(&self, candidate: &Struct) -> Option<Arc<Struct>> {
        let existing = match candidate.kind {
            StructKind::Composite => self.lookup_children(&candidate.children),
            StructKind::Leaf => self.lookup_leaf(&candidate.values),
            StructKind::Blueprint => None,
        };
        existing.and_then(|id| self.get(id))
    }
    // Checks the shape of a struct about to be kept under `id`, and works
    // out its base and span from the already kept children.
    fn identify(&self, candidate: Struct, id: StructId) -> Result<Struct> {
        match candidate.kind {
            StructKind::Blueprint => Err(StructDbError::InvalidArgument(
                "blueprint references cannot be kept in the store".into(),
            )),
            StructKind::Leaf => {
                if candidate.values.is_empty() || !candidate.children.is_empty() {
                    return Err(StructDbError::InvalidArgument(
                        "a leaf needs literal values and no children".into(),
                    ));
                }
                let span = candidate.values.len();
                Ok(candidate.with_identity(id, id, span))
            }
            StructKind::Composite => {
                if candidate.children.is_empty() || !candidate.values.is_empty() {
                    return Err(StructDbError::InvalidArgument(
                        "a composite needs children and no literal values".into(),
                    ));
                }
                let mut span = 0usize;
                let mut base = UNASSIGNED;
                for (i, child) in candidate.children.iter().enumerate() {
                    if *child >= id {
                        return Err(StructDbError::out_of_range(format!(
                            "child {} of struct {} does not precede it",
                            child, id
                        )));
                    }
                    let kept_child = self.get(*child).ok_or_else(|| {
                        StructDbError::out_of_range(format!("child {} of struct {} is not kept", child, id))
                    })?;
                    if i == 0 {
                        base = kept_child.base;
                    }
                    span = span.saturating_add(kept_child.span);
                }
                Ok(candidate.with_identity(id, base, span))
            }
        }
    }
    fn index(&mut self, kept: &Arc<Struct>) {
        match kept.kind {
            StructKind::Composite => {
                self.children_lookup.insert(kept.children.clone(), kept.id);
            }
            StructKind::Leaf => {
                self.leaf_lookup.insert(kept.values.clone(), kept.id);
            }
            StructKind::Blueprint => (),
        }
    }
    // Reading the next id, appending and indexing happen under the same
    // exclusive borrow, so callers holding the write lock get all of it.
    pub fn keep(&mut self, candidate: Struct) -> Result<(Arc<Struct>, bool)> {
        if let Some(existing) = self.previously_kept(&candidate) {
            return Ok((existing, true));
        }
        let id = self.next_id()?;
        let kept = Arc::new(self.identify(candidate, id)?);
        self.kept.push(Some(Arc::clone(&kept)));
        self.index(&kept);
        Ok((kept, false))
    }
    pub fn keep_at(&mut self, id: StructId, candidate: Struct) -> Result<(Arc<Struct>, bool)> {
        match self.kept.get(id as usize) {
            Some(None) => (),
            Some(Some(_)) => {
                return Err(StructDbError::InvalidArgument(format!("slot {} is already filled", id)));
            }
            None => {
                return Err(StructDbError::InvalidArgument(format!("slot {} was never reserved", id)));
            }
        }
        if let Some(existing) = self.previously_kept(&candidate) {
            return Ok((existing, true));
        }
        let kept = Arc::new(self.identify(candidate, id)?);
        self.kept[id as usize] = Some(Arc::clone(&kept));
        self.index(&kept);
        Ok((kept, false))
    }
    // Concatenated literal values below `id`, expanded without recursion.
    pub fn values(&self, id: StructId) -> Result<Vec<Value>> {
        let root = self.get(id).ok_or_else(|| StructDbError::out_of_range(format!("struct {} is not kept", id)))?;
        let mut values = Vec::with_capacity(root.span);
        let mut pending = vec![root];
        while let Some(current) = pending.pop() {
            if current.is_leaf() {
                values.extend_from_slice(&current.values);
                continue;
            }
            for child in current.children.iter().rev() {
                let kept_child = self.get(*child).ok_or_else(|| {
                    StructDbError::out_of_range(format!("child {} of struct {} is not kept", child, current.id))
                })?;
                pending.push(kept_child);
            }
        }
        Ok(values)
    }
    pub fn first_value(&self, id: StructId) -> Option<Value> {
        let mut current = self.get(id)?;
        while !current.is_leaf() {
            current = self.get(*current.children.first()?)?;
        }
        current.values.first().copied()
    }
    // Every id below `id` in pre-order, the root itself excluded.
    pub fn descendants(&self, id: StructId) -> Result<Vec<StructId>> {
        let root = self.get(id).ok_or_else(|| StructDbError::out_of_range(format!("struct {} is not kept", id)))?;
        let mut descendants = Vec::new();
        let mut pending: Vec<StructId> = root.children.iter().rev().copied().collect();
        while let Some(current) = pending.pop() {
            descendants.push(current);
            let kept = self.get(current).ok_or_else(|| {
                StructDbError::out_of_range(format!("descendant {} of struct {} is not kept", current, id))
            })?;
            pending.extend(kept.children.iter().rev());
        }
        Ok(descendants)
    }
    // Rebuilds a keeper from records read back from disk. Records arrive
    // in id order, so every child is already kept when its parent is.
    pub fn restore(records: Vec<Struct>) -> Result<Self> {
        let mut keeper = Self::new();
        for record in records {
            let id = keeper.next_id()?;
            if record.id != id {
                return Err(StructDbError::InvalidFormat(format!(
                    "record {} found where record {} was expected",
                    record.id, id
                )));
            }
            if keeper.previously_kept(&record).is_some() {
                return Err(StructDbError::InvalidFormat(format!("record {} duplicates a kept struct", id)));
            }
            let base = record.base;
            if base > id || (base < id && keeper.get(base).is_none()) {
                return Err(StructDbError::out_of_range(format!("base {} of struct {} is not kept", base, id)));
            }
            let identified = keeper.identify(record, id)?;
            let span = identified.span;
            let kept = Arc::new(identified.with_identity(id, base, span));
            keeper.kept.push(Some(Arc::clone(&kept)));
            keeper.index(&kept);
        }
        keeper.settled = keeper.kept.len();
        Ok(keeper)
    }
    // Reassigns the ids of structs kept since the last reindex by ascending
    // span, keeping the previous order among equal spans. Settled structs
    // keep their ids, so blueprints naming them stay valid. Unfilled
    // reserved slots are dropped. Returns old -> new.
    pub fn reindex_by_span(&mut self) -> Vec<StructId> {
        let settled = self.settled.min(self.kept.len());
        let mut fresh: Vec<Arc<Struct>> = self.kept[settled..].iter().flatten().cloned().collect();
        fresh.sort_by_key(|kept| kept.span);
        let mut remap: Vec<StructId> = (0..settled).map(|id| id as StructId).collect();
        remap.resize(self.kept.len(), UNASSIGNED);
        for (offset, kept) in fresh.iter().enumerate() {
            remap[kept.id as usize] = (settled + offset) as StructId;
        }
        let renumbered = remap.iter().enumerate().any(|(old, new)| old as StructId != *new);
        self.kept.truncate(settled);
        for kept in fresh {
            let renamed = Struct {
                id: remap[kept.id as usize],
                kind: kept.kind,
                children: kept.children.iter().map(|child| remap[*child as usize]).collect(),
                values: kept.values.clone(),
                base: remap[kept.base as usize],
                span: kept.span,
            };
            self.kept.push(Some(Arc::new(renamed)));
        }
        if renumbered {
            self.children_lookup.clear();
            self.leaf_lookup.clear();
            let kept: Vec<Arc<Struct>> = self.iter().cloned().collect();
            for kept in &kept {
                self.index(kept);
            }
            self.generation += 1;
        }
        self.settled = self.kept.len();
        remap
    }
}

// ------------- LookupCache -------------
// Remembers which struct owned a children sequence. Entries are only hints:
// callers verify the owner's children before trusting a hit.
#[derive(Debug)]
pub struct LookupCache {
    kept: LruCache<u64, StructId>,
    hits: u64,
    misses: u64,
}
impl LookupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            kept: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }
    pub fn key(children: &[StructId]) -> u64 {
        let mut hasher = SeaHasher::default();
        children.hash(&mut hasher);
        hasher.finish()
    }
    pub fn get(&mut self, key: u64) -> Option<StructId> {
        let found = self.kept.get(&key).copied();
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }
    pub fn put(&mut self, key: u64, id: StructId) {
        self.kept.put(key, id);
    }
    pub fn clear(&mut self) {
        self.kept.clear();
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn hits(&self) -> u64 {
        self.hits
    }
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

// ------------- Database -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    Directory(PathBuf),
}

// This sets up the store with the necessary structures
pub struct Database {
    // owns the arena of structs and its indexes
    pub struct_keeper: Arc<RwLock<StructKeeper>>,
    // shared by every dedup lookup
    pub lookup_cache: Arc<Mutex<LookupCache>>,
    // responsible for the persistence layer, absent when in memory
    pub persistor: Option<Arc<Mutex<Persistor>>>,
}

impl Database {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        Self::with_cache_capacity(mode, DEFAULT_CACHE_CAPACITY)
    }
    pub fn with_cache_capacity(mode: PersistenceMode, capacity: usize) -> Result<Self> {
        let (struct_keeper, persistor) = match mode {
            PersistenceMode::InMemory => (StructKeeper::new(), None),
            PersistenceMode::Directory(directory) => {
                let persistor = Persistor::new(directory)?;
                // Restore the existing store, or start empty
                let struct_keeper = match persistor.restore()? {
                    Some(records) => StructKeeper::restore(records)?,
                    None => StructKeeper::new(),
                };
                info!(
                    structs = struct_keeper.len(),
                    directory = %persistor.directory().display(),
                    "opened struct store"
                );
                (struct_keeper, Some(Arc::new(Mutex::new(persistor))))
            }
        };
        Ok(Database {
            struct_keeper: Arc::new(RwLock::new(struct_keeper)),
            lookup_cache: Arc::new(Mutex::new(LookupCache::new(capacity))),
            persistor,
        })
    }
    // functions to access the owned keeper and cache
    pub fn struct_keeper(&self) -> Arc<RwLock<StructKeeper>> {
        Arc::clone(&self.struct_keeper)
    }
    pub fn lookup_cache(&self) -> Arc<Mutex<LookupCache>> {
        Arc::clone(&self.lookup_cache)
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.struct_keeper.read()?.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.struct_keeper.read()?.is_empty())
    }
    // changes whenever a flush renumbers kept structs
    pub fn generation(&self) -> Result<u64> {
        Ok(self.struct_keeper.read()?.generation())
    }
    pub fn new_id(&self, reserve: bool) -> Result<StructId> {
        let mut keeper = self.struct_keeper.write()?;
        if reserve {
            keeper.reserve()
        } else {
            keeper.next_id()
        }
    }
    pub fn get_by_id(&self, id: StructId) -> Result<Option<Arc<Struct>>> {
        Ok(self.struct_keeper.read()?.get(id))
    }
    pub fn get_by_literal_values(&self, values: &[Value]) -> Result<Option<Arc<Struct>>> {
        if values.is_empty() {
            return Ok(None);
        }
        let guard = self.struct_keeper.read()?;
        let keeper: &StructKeeper = &guard;
        let found = keeper
            .slots()
            .par_iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|kept| kept.span == values.len() && keeper.first_value(kept.id) == Some(values[0]))
            .find_first(|kept| {
                keeper
                    .values(kept.id)
                    .map(|flattened| flattened == values)
                    .unwrap_or(false)
            })
            .cloned();
        Ok(found)
    }
    pub fn get_by_children(&self, children: &[StructId]) -> Result<Option<Arc<Struct>>> {
        if children.is_empty() {
            return Err(StructDbError::InvalidArgument("children lookup needs at least one child".into()));
        }
        let key = LookupCache::key(children);
        let keeper = self.struct_keeper.read()?;
        if let Some(id) = self.lookup_cache.lock()?.get(key) {
            if let Some(owner) = keeper.get(id) {
                if owner.children() == children {
                    return Ok(Some(owner));
                }
            }
        }
        match keeper.lookup_children(children) {
            Some(id) => {
                self.lookup_cache.lock()?.put(key, id);
                Ok(keeper.get(id))
            }
            None => Ok(None),
        }
    }
    pub fn get_by_child_structs(&self, children: &[Arc<Struct>]) -> Result<Option<Arc<Struct>>> {
        let ids: Vec<StructId> = children.iter().map(|child| child.id()).collect();
        self.get_by_children(&ids)
    }
    pub fn keep(&self, candidate: Struct) -> Result<(Arc<Struct>, bool)> {
        let (kept, previously_kept) = self.struct_keeper.write()?.keep(candidate)?;
        if !previously_kept {
            debug!(id = kept.id(), kind = %kept.kind(), span = kept.span(), "kept new struct");
            if kept.is_composite() {
                self.lookup_cache
                    .lock()?
                    .put(LookupCache::key(kept.children()), kept.id());
            }
        }
        Ok((kept, previously_kept))
    }
    pub fn insert(&self, candidate: Struct) -> Result<Arc<Struct>> {
        Ok(self.keep(candidate)?.0)
    }
    pub fn insert_at(&self, id: StructId, candidate: Struct) -> Result<Arc<Struct>> {
        let (kept, _) = self.struct_keeper.write()?.keep_at(id, candidate)?;
        Ok(kept)
    }
    pub fn keep_composite(&self, children: Vec<StructId>) -> Result<(Arc<Struct>, bool)> {
        self.keep(Struct::composite(children))
    }
    pub fn leaf_for(&self, value: Value) -> Result<Arc<Struct>> {
        let existing = {
            let keeper = self.struct_keeper.read()?;
            keeper.lookup_leaf(&[value]).and_then(|id| keeper.get(id))
        };
        match existing {
            Some(leaf) => Ok(leaf),
            None => self.insert(Struct::leaf(vec![value])),
        }
    }
    pub fn structs_of_length(&self, length: usize) -> Result<Vec<Arc<Struct>>> {
        let keeper = self.struct_keeper.read()?;
        Ok(keeper
            .slots()
            .par_iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|kept| kept.span == length)
            .cloned()
            .collect())
    }
    pub fn first_value(&self, id: StructId) -> Result<Option<Value>> {
        Ok(self.struct_keeper.read()?.first_value(id))
    }
    pub fn expand(&self, id: StructId) -> Result<Vec<Value>> {
        self.struct_keeper.read()?.values(id)
    }
    pub fn descendants(&self, id: StructId) -> Result<Vec<StructId>> {
        self.struct_keeper.read()?.descendants(id)
    }
    pub fn snapshot(&self) -> Result<Vec<Arc<Struct>>> {
        Ok(self.struct_keeper.read()?.iter().cloned().collect())
    }
    // The decode path: blueprint bytes back to the literal sequence.
    pub fn materialize(&self, blueprint: &[u8]) -> Result<Vec<Value>> {
        Blueprint::from_bytes(blueprint)?.expand(self)
    }
    // Reindexes the structs kept since the last flush and writes the store
    // when it is backed by a directory. Returns the old -> new id mapping
    // (identity when in memory).
    pub fn flush(&self) -> Result<Vec<StructId>> {
        let persistor = match &self.persistor {
            Some(persistor) => persistor,
            None => {
                let len = self.len()?;
                return Ok((0..len).map(|id| id as StructId).collect());
            }
        };
        let mut keeper = self.struct_keeper.write()?;
        let remap = keeper.reindex_by_span();
        self.lookup_cache.lock()?.clear();
        let structs: Vec<Arc<Struct>> = keeper.iter().cloned().collect();
        persistor.lock()?.save(&structs)?;
        Ok(remap)
    }
}
