//! The catalog engine: rewrites input as references into the struct store,
//! grows the store with the pairs it has not seen before, and hands back a
//! blueprint of the result.
//!
//! Cataloging runs in three steps:
//! * tokenize: greedy, non-overlapping substitution of known patterns,
//!   trying the most recent (highest id) patterns first;
//! * reduce: pairwise, left to right merging of the tokens until a single
//!   root remains, reusing existing pairs through the children index;
//! * flush: the store is reindexed and written, and the root id remapped.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::ops::RangeInclusive;
use std::sync::Arc;

use rayon::prelude::*;
use seahash::SeaHasher;
use serde::Deserialize;
use tracing::{debug, info};

use crate::blueprint::Blueprint;
use crate::construct::{Database, OtherHasher, Struct, StructId, UNASSIGNED, Value};
use crate::error::{Result, StructDbError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Bit,
    #[default]
    Byte,
}
impl Granularity {
    pub fn alphabet(&self) -> RangeInclusive<Value> {
        match self {
            Granularity::Bit => 0..=1,
            Granularity::Byte => 0..=Value::MAX,
        }
    }
}

/// One element of a sequence being tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Literal(Value),
    Struct(StructId),
}

// (pattern, fingerprint and length of the scanned tokens) -> the scanned
// tokens and their replacement, None when the pattern did not occur
type Memo = HashMap<(StructId, u64, usize), (Vec<Token>, Option<Vec<Token>>), OtherHasher>;

pub struct Catalog<'db> {
    database: &'db Database,
    granularity: Granularity,
    full_blueprints: bool,
    memo: Memo,
    // store generation the memo was filled under
    memo_generation: u64,
}

impl<'db> Catalog<'db> {
    pub fn new(database: &'db Database, granularity: Granularity) -> Self {
        Self {
            database,
            granularity,
            full_blueprints: false,
            memo: Memo::default(),
            memo_generation: 0,
        }
    }
    pub fn with_full_blueprints(mut self, full: bool) -> Self {
        self.full_blueprints = full;
        self
    }
    pub fn database(&self) -> &'db Database {
        self.database
    }
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Catalogs `data` into the store, persists the store, and returns the
    /// blueprint of the root struct.
    pub fn catalog(&mut self, data: &[Value]) -> Result<Blueprint> {
        if data.is_empty() {
            debug!("empty input, nothing to catalog");
            return Ok(Blueprint::empty());
        }
        // scans of one input say nothing about the next
        self.memo.clear();
        if self.database.is_empty()? {
            self.bootstrap()?;
        }
        let before = self.database.len()?;
        let root = match self.database.get_by_literal_values(data)? {
            Some(existing) => {
                debug!(root = existing.id(), "input already cataloged");
                existing
            }
            None => {
                let tokens = self.tokenize(data)?;
                self.reduce(&tokens)?
            }
        };
        let created = self.database.len()? - before;
        let remap = self.database.flush()?;
        let root_id = remap
            .get(root.id() as usize)
            .copied()
            .filter(|id| *id != UNASSIGNED)
            .ok_or_else(|| StructDbError::Invariant(format!("root {} lost in reindex", root.id())))?;
        info!(input = data.len(), root = root_id, created, "cataloged input");
        Blueprint::for_struct(self.database, root_id, self.full_blueprints)
    }

    /// Seeds an empty store with one leaf per value of the alphabet.
    pub fn bootstrap(&self) -> Result<usize> {
        let mut created = 0;
        for value in self.granularity.alphabet() {
            let (_, previously_kept) = self.database.keep(Struct::leaf(vec![value]))?;
            if !previously_kept {
                created += 1;
            }
        }
        debug!(leaves = created, granularity = ?self.granularity, "bootstrapped alphabet");
        Ok(created)
    }

    /// Rewrites `data` as the shortest run of known struct references found
    /// by greedy substitution, most recent patterns first.
    pub fn tokenize(&mut self, data: &[Value]) -> Result<Vec<StructId>> {
        // memoized replacements name ids a reindex may have moved
        let generation = self.database.generation()?;
        if generation != self.memo_generation {
            self.memo.clear();
            self.memo_generation = generation;
        }
        let mut tokens: Vec<Token> = data.iter().map(|value| Token::Literal(*value)).collect();
        let mut candidates = self.database.snapshot()?;
        candidates.retain(|candidate| candidate.span() >= 2);
        candidates.reverse();
        for candidate in candidates {
            if tokens.len() <= 2 {
                break;
            }
            let literals = tokens.iter().filter(|token| matches!(token, Token::Literal(_))).count();
            if candidate.span() > tokens.len() || candidate.span() > literals {
                continue;
            }
            let key = (candidate.id(), fingerprint(&tokens), tokens.len());
            // a hit only counts when the scanned tokens are the same
            let memoized = self
                .memo
                .get(&key)
                .filter(|(scanned, _)| *scanned == tokens)
                .map(|(_, replaced)| replaced.clone());
            let replaced = match memoized {
                Some(replaced) => replaced,
                None => {
                    let replaced = self.substitute_candidate(&tokens, &candidate)?;
                    self.memo.insert(key, (tokens.clone(), replaced.clone()));
                    replaced
                }
            };
            if let Some(replaced) = replaced {
                tokens = replaced;
            }
        }
        let mut resolved = Vec::with_capacity(tokens.len());
        for token in tokens {
            match token {
                Token::Struct(id) => resolved.push(id),
                Token::Literal(value) => resolved.push(self.database.leaf_for(value)?.id()),
            }
        }
        debug!(input = data.len(), tokens = resolved.len(), "tokenized input");
        Ok(resolved)
    }

    fn substitute_candidate(&self, tokens: &[Token], candidate: &Arc<Struct>) -> Result<Option<Vec<Token>>> {
        let first = match self.database.first_value(candidate.id())? {
            Some(first) => first,
            None => return Ok(None),
        };
        if !tokens.contains(&Token::Literal(first)) {
            return Ok(None);
        }
        let pattern = self.database.expand(candidate.id())?;
        Ok(substitute(tokens, candidate.id(), &pattern))
    }

    /// Merges tokens pairwise, left to right, until one root remains. An odd
    /// token out is carried to the end of the next level.
    pub fn reduce(&self, tokens: &[StructId]) -> Result<Arc<Struct>> {
        if tokens.is_empty() {
            return Err(StructDbError::InvalidArgument("nothing to reduce".into()));
        }
        let database = self.database;
        let mut level = tokens.to_vec();
        while level.len() > 1 {
            let carried = if level.len() % 2 == 1 { level.pop() } else { None };
            // lookups only read committed state, so they can run side by side
            let found: Vec<Option<Arc<Struct>>> = level
                .par_chunks(2)
                .map(|pair| database.get_by_children(pair))
                .collect::<Result<_>>()?;
            let mut next = Vec::with_capacity(level.len() / 2 + 1);
            for (pair, existing) in level.chunks(2).zip(found) {
                let parent = match existing {
                    Some(parent) => parent,
                    // kept in pair order so ids come out the same every run
                    None => database.keep_composite(pair.to_vec())?.0,
                };
                next.push(parent.id());
            }
            next.extend(carried);
            debug!(from = level.len(), to = next.len(), "reduced level");
            level = next;
        }
        database
            .get_by_id(level[0])?
            .ok_or_else(|| StructDbError::out_of_range(format!("token {} is not kept", level[0])))
    }

    /// The decode path: expands a blueprint back into its literal sequence.
    pub fn expand(&self, blueprint: &Blueprint) -> Result<Vec<Value>> {
        blueprint.expand(self.database)
    }
}

fn fingerprint(tokens: &[Token]) -> u64 {
    let mut hasher = SeaHasher::default();
    tokens.hash(&mut hasher);
    hasher.finish()
}

// Replaces every non-overlapping occurrence of `pattern` among the literal
// tokens, scanning left to right. None when nothing matched.
fn substitute(tokens: &[Token], id: StructId, pattern: &[Value]) -> Option<Vec<Token>> {
    let width = pattern.len();
    let first = Token::Literal(*pattern.first()?);
    let mut replaced = Vec::with_capacity(tokens.len());
    let mut matched = false;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == first && i + width <= tokens.len() && matches_at(&tokens[i..i + width], pattern) {
            replaced.push(Token::Struct(id));
            i += width;
            matched = true;
        } else {
            replaced.push(tokens[i]);
            i += 1;
        }
    }
    matched.then_some(replaced)
}

fn matches_at(window: &[Token], pattern: &[Value]) -> bool {
    window
        .iter()
        .zip(pattern)
        .all(|(token, value)| *token == Token::Literal(*value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_skips_overlaps() {
        let tokens: Vec<Token> = [1, 1, 1, 1, 1].iter().map(|v| Token::Literal(*v)).collect();
        let replaced = substitute(&tokens, 9, &[1, 1]).unwrap();
        assert_eq!(
            replaced,
            vec![Token::Struct(9), Token::Struct(9), Token::Literal(1)]
        );
    }

    #[test]
    fn substitution_never_spans_references() {
        let tokens = vec![Token::Literal(4), Token::Struct(7), Token::Literal(5)];
        assert!(substitute(&tokens, 9, &[4, 5]).is_none());
    }

    #[test]
    fn bit_alphabet_has_two_values() {
        assert_eq!(Granularity::Bit.alphabet().count(), 2);
        assert_eq!(Granularity::Byte.alphabet().count(), 256);
    }
}
