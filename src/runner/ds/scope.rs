//! Named, case-insensitive, insertion-ordered variable containers.
//!
//! A [`Scope`] is always handed around as a [`ScopeRef`]. Application and
//! session scopes are written from many request threads at once, so every
//! scope guards its map with its own lock; per-call scopes simply never see
//! contention on it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

use crate::runner::ds::error::{Result, RuntimeError};
use crate::runner::ds::key::{Key, ARGUMENTS};
use crate::runner::ds::value::Value;

pub type ScopeRef = Arc<Scope>;

/// Copies made so far by a deep copy, keyed by the original scope. A struct
/// reached twice is copied once, so shared and cyclic structs keep their
/// shape in the copy.
pub type CopyMap = HashMap<*const Scope, ScopeRef>;

enum ScopeKind {
    Generic,
    /// Numeric keys address entries by 1-based insertion position.
    Positional,
    /// A fixed key set that becomes read-only once `sealed` is set.
    PartiallyLocked {
        locked: HashSet<Key>,
        sealed: AtomicBool,
    },
}

pub struct Scope {
    name: Key,
    kind: ScopeKind,
    map: RwLock<IndexMap<Key, Value>>,
}

impl Scope {
    fn build(name: Key, kind: ScopeKind, map: IndexMap<Key, Value>) -> ScopeRef {
        Arc::new(Scope {
            name,
            kind,
            map: RwLock::new(map),
        })
    }

    pub fn new(name: impl Into<Key>) -> ScopeRef {
        Scope::build(name.into(), ScopeKind::Generic, IndexMap::new())
    }

    /// The `arguments` scope of a call.
    pub fn new_arguments() -> ScopeRef {
        Scope::build(ARGUMENTS.clone(), ScopeKind::Positional, IndexMap::new())
    }

    /// Builds a scope seeded with `entries` whose keys are locked as soon as
    /// this returns. Keys added later stay writable.
    pub fn new_locked(name: impl Into<Key>, entries: Vec<(Key, Value)>) -> ScopeRef {
        let locked = entries.iter().map(|(k, _)| k.clone()).collect();
        let scope = Scope::build(
            name.into(),
            ScopeKind::PartiallyLocked {
                locked,
                sealed: AtomicBool::new(false),
            },
            entries.into_iter().collect(),
        );
        if let ScopeKind::PartiallyLocked { sealed, .. } = &scope.kind {
            sealed.store(true, Ordering::Release);
        }
        scope
    }

    pub fn name(&self) -> &Key {
        &self.name
    }

    pub fn is_positional(&self) -> bool {
        matches!(self.kind, ScopeKind::Positional)
    }

    pub fn is_locked(&self, key: &Key) -> bool {
        match &self.kind {
            ScopeKind::PartiallyLocked { locked, sealed } => {
                sealed.load(Ordering::Acquire) && locked.contains(key)
            }
            _ => false,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<Key, Value>> {
        self.map.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<Key, Value>> {
        self.map.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maps a positional key onto the real key it addresses.
    fn real_key(&self, map: &IndexMap<Key, Value>, key: &Key) -> Key {
        if let (ScopeKind::Positional, Some(n)) = (&self.kind, key.int_value()) {
            if n >= 1 && (n as usize) <= map.len() {
                if let Some((real, _)) = map.get_index(n as usize - 1) {
                    return real.clone();
                }
            }
        }
        key.clone()
    }

    fn check_writable(&self, key: &Key) -> Result<()> {
        if self.is_locked(key) {
            return Err(RuntimeError::LockedKey {
                scope: self.name.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    pub fn get(&self, key: &Key) -> Option<Value> {
        let map = self.read();
        let key = self.real_key(&map, key);
        map.get(&key).cloned()
    }

    pub fn get_or(&self, key: &Key, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        let map = self.read();
        let key = self.real_key(&map, key);
        map.contains_key(&key)
    }

    /// Stores `value`, returning the previous binding.
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let mut map = self.write();
        let key = self.real_key(&map, &key);
        self.check_writable(&key)?;
        Ok(map.insert(key, value.into()))
    }

    /// Stores `value` only when `key` is unbound. Returns whatever is bound
    /// afterwards.
    pub fn put_if_absent(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Value> {
        let key = key.into();
        let mut map = self.write();
        let key = self.real_key(&map, &key);
        if let Some(existing) = map.get(&key) {
            return Ok(existing.clone());
        }
        self.check_writable(&key)?;
        let value = value.into();
        map.insert(key, value.clone());
        Ok(value)
    }

    /// Read-modify-write under the scope's own lock.
    pub fn update<F>(&self, key: impl Into<Key>, f: F) -> Result<Value>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = key.into();
        let mut map = self.write();
        let key = self.real_key(&map, &key);
        self.check_writable(&key)?;
        let value = f(map.get(&key));
        map.insert(key, value.clone());
        Ok(value)
    }

    pub fn remove(&self, key: &Key) -> Result<Option<Value>> {
        let mut map = self.write();
        let key = self.real_key(&map, key);
        self.check_writable(&key)?;
        Ok(map.shift_remove(&key))
    }

    pub fn keys(&self) -> Vec<Key> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes every binding that is not locked.
    pub fn clear(&self) {
        let mut map = self.write();
        map.retain(|k, _| self.is_locked(k));
    }

    pub fn snapshot(&self) -> Vec<(Key, Value)> {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// A deep copy with the same name. The copy is never locked.
    pub fn duplicate(&self) -> ScopeRef {
        self.duplicate_with(&mut CopyMap::new())
    }

    pub fn duplicate_with(&self, copies: &mut CopyMap) -> ScopeRef {
        if let Some(copy) = copies.get(&(self as *const Scope)) {
            return copy.clone();
        }
        let kind = match self.kind {
            ScopeKind::Positional => ScopeKind::Positional,
            _ => ScopeKind::Generic,
        };
        let copy = Scope::build(self.name.clone(), kind, IndexMap::new());
        copies.insert(self as *const Scope, copy.clone());

        let entries: Vec<(Key, Value)> = self
            .snapshot()
            .into_iter()
            .map(|(k, v)| (k, v.duplicate_with(copies)))
            .collect();
        copy.write().extend(entries);
        copy
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.name)?;
        let map = self.read();
        let mut dbg = f.debug_map();
        for (k, v) in map.iter() {
            match v {
                Value::Struct(s) => dbg.entry(k, &format!("struct[{}]", s.name())),
                other => dbg.entry(k, other),
            };
        }
        dbg.finish()
    }
}
