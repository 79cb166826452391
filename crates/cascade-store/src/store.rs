//! The runtime store: a typed key/value container with ordinal-ordered
//! deltas, a bounded reorg window, and policy-driven segment merge.
//!
//! A store instance is owned by exactly one pipeline and mutated only by
//! its owning module; no locking is required.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::delta::{Delta, DeltaOp};
use crate::error::{Error, Result};
use crate::value::{combine_numeric, NumericOp, UpdatePolicy, ValueType};
use crate::RESERVED_PREFIX;

/// A typed key→value store with per-block delta tracking.
#[derive(Debug, Clone)]
pub struct Store {
    name: String,
    module_hash: String,
    module_start_block: u64,
    update_policy: UpdatePolicy,
    value_type: ValueType,
    kv: HashMap<String, Bytes>,
    deltas: Vec<Delta>,
    last_ordinal: u64,
    deleted_prefixes: Vec<String>,
    /// Recent per-block delta batches, oldest first, kept for fork undo.
    window: VecDeque<(u64, Vec<Delta>)>,
}

impl Store {
    /// Creates an empty store for the given module.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        module_hash: impl Into<String>,
        module_start_block: u64,
        update_policy: UpdatePolicy,
        value_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            module_hash: module_hash.into(),
            module_start_block,
            update_policy,
            value_type,
            kv: HashMap::new(),
            deltas: Vec::new(),
            last_ordinal: 0,
            deleted_prefixes: Vec::new(),
            window: VecDeque::new(),
        }
    }

    /// Rebuilds a store from decoded segment contents.
    pub(crate) fn from_segment_parts(
        name: String,
        module_hash: String,
        module_start_block: u64,
        update_policy: UpdatePolicy,
        value_type: ValueType,
        kv: HashMap<String, Bytes>,
        deleted_prefixes: Vec<String>,
    ) -> Self {
        Self {
            name,
            module_hash,
            module_start_block,
            update_policy,
            value_type,
            kv,
            deltas: Vec::new(),
            last_ordinal: 0,
            deleted_prefixes,
            window: VecDeque::new(),
        }
    }

    /// The store (module) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning module's deterministic hash.
    #[must_use]
    pub fn module_hash(&self) -> &str {
        &self.module_hash
    }

    /// The owning module's start block.
    #[must_use]
    pub const fn module_start_block(&self) -> u64 {
        self.module_start_block
    }

    /// The declared update policy.
    #[must_use]
    pub const fn update_policy(&self) -> UpdatePolicy {
        self.update_policy
    }

    /// The declared value type.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    /// Returns true when the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    /// Iterates over current key/value pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.kv.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Deltas recorded for the current block so far.
    #[must_use]
    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Prefixes deleted over this store's covered range.
    #[must_use]
    pub fn deleted_prefixes(&self) -> &[String] {
        &self.deleted_prefixes
    }

    /// Current value for a key.
    #[must_use]
    pub fn get_last(&self, key: &str) -> Option<Bytes> {
        self.kv.get(key).cloned()
    }

    /// Value at the start of the current block, before any delta.
    #[must_use]
    pub fn get_first(&self, key: &str) -> Option<Bytes> {
        self.get_at(0, key)
    }

    /// Value as visible immediately before any delta at `ord`.
    ///
    /// Walks the current block's deltas in reverse, un-applying every
    /// mutation of `key` recorded at or after `ord`.
    #[must_use]
    pub fn get_at(&self, ord: u64, key: &str) -> Option<Bytes> {
        let mut value = self.kv.get(key).cloned();
        for delta in self.deltas.iter().rev() {
            if delta.ordinal < ord || delta.key != key {
                continue;
            }
            value = match delta.op {
                DeltaOp::Create => None,
                DeltaOp::Update | DeltaOp::Delete => Some(delta.old_value.clone()),
            };
        }
        value
    }

    /// Sets a key to a value.
    ///
    /// A write whose new value byte-equals the current value is a no-op:
    /// no delta, no state change.
    ///
    /// # Errors
    ///
    /// Fails on reserved keys and backward-moving ordinals.
    pub fn set(&mut self, ord: u64, key: &str, value: Bytes) -> Result<()> {
        self.check_reserved(key)?;
        self.bump_ordinal(ord)?;

        let delta = match self.kv.get(key) {
            Some(old) if *old == value => return Ok(()),
            Some(old) => Delta::update(ord, key, old.clone(), value),
            None => Delta::create(ord, key, value),
        };
        self.apply_delta(&delta);
        self.deltas.push(delta);
        Ok(())
    }

    /// Sets a key only when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails on reserved keys and backward-moving ordinals.
    pub fn set_if_not_exists(&mut self, ord: u64, key: &str, value: Bytes) -> Result<()> {
        self.check_reserved(key)?;
        self.bump_ordinal(ord)?;

        if self.kv.contains_key(key) {
            return Ok(());
        }
        let delta = Delta::create(ord, key, value);
        self.apply_delta(&delta);
        self.deltas.push(delta);
        Ok(())
    }

    /// Appends bytes to a key's value; an absent key starts empty.
    ///
    /// # Errors
    ///
    /// Fails on reserved keys and backward-moving ordinals.
    pub fn append(&mut self, ord: u64, key: &str, value: &[u8]) -> Result<()> {
        let new_value = match self.get_at(ord, key) {
            Some(old) => {
                let mut combined = Vec::with_capacity(old.len() + value.len());
                combined.extend_from_slice(&old);
                combined.extend_from_slice(value);
                Bytes::from(combined)
            }
            None => Bytes::copy_from_slice(value),
        };
        self.set(ord, key, new_value)
    }

    /// Deletes a key. Deleting an absent key records nothing.
    ///
    /// # Errors
    ///
    /// Fails on backward-moving ordinals.
    pub fn delete(&mut self, ord: u64, key: &str) -> Result<()> {
        self.bump_ordinal(ord)?;

        if let Some(old) = self.kv.remove(key) {
            self.deltas.push(Delta::delete(ord, key, old));
        }
        Ok(())
    }

    /// Deletes every key with the given prefix and records the prefix for
    /// partial-segment merge semantics.
    ///
    /// # Errors
    ///
    /// Fails on backward-moving ordinals.
    pub fn delete_prefix(&mut self, ord: u64, prefix: &str) -> Result<()> {
        self.bump_ordinal(ord)?;

        let mut matching: Vec<String> = self
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        matching.sort_unstable();

        for key in matching {
            if let Some(old) = self.kv.remove(&key) {
                self.deltas.push(Delta::delete(ord, key, old));
            }
        }

        if !self.deleted_prefixes.iter().any(|p| p == prefix) {
            self.deleted_prefixes.push(prefix.to_string());
        }
        Ok(())
    }

    /// Moves the current block's deltas into the reorg window and returns
    /// them for emission. Resets the ordinal watermark for the next block.
    pub fn flush(&mut self, block_num: u64) -> Vec<Delta> {
        let deltas = std::mem::take(&mut self.deltas);
        self.window.push_back((block_num, deltas.clone()));
        self.last_ordinal = 0;
        deltas
    }

    /// Reverts every delta recorded for blocks above `target_block`.
    pub fn undo(&mut self, target_block: u64) {
        while let Some((block_num, _)) = self.window.back() {
            if *block_num <= target_block {
                break;
            }
            let Some((block_num, deltas)) = self.window.pop_back() else {
                break;
            };
            tracing::debug!(store = %self.name, block = block_num, "reverting block deltas");
            for delta in deltas.iter().rev() {
                match delta.op {
                    DeltaOp::Create => {
                        self.kv.remove(&delta.key);
                    }
                    DeltaOp::Update | DeltaOp::Delete => {
                        self.kv
                            .insert(delta.key.clone(), delta.old_value.clone());
                    }
                }
            }
        }
    }

    /// Drops reorg-window entries at or below the new LIB; those blocks
    /// can no longer be forked out.
    pub fn prune(&mut self, lib_num: u64) {
        while let Some((block_num, _)) = self.window.front() {
            if *block_num > lib_num {
                break;
            }
            self.window.pop_front();
        }
    }

    /// Number of blocks currently retained in the reorg window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Merges an earlier segment (`prev`) into this later one, producing
    /// a store covering their union.
    ///
    /// Per-key resolution follows the update policy; keys present in only
    /// one segment carry through, except prev-only keys matching one of
    /// this segment's deleted prefixes, which are dropped.
    ///
    /// # Errors
    ///
    /// Fails when module hash, update policy, or value type differ, or
    /// when a numeric policy meets an unparseable value.
    pub fn merge(&mut self, prev: &Store) -> Result<()> {
        if self.module_hash != prev.module_hash {
            return Err(self.incompatible(format!(
                "module hash mismatch ({} vs {})",
                self.module_hash, prev.module_hash
            )));
        }
        if self.update_policy != prev.update_policy {
            return Err(self.incompatible(format!(
                "update policy mismatch ({} vs {})",
                self.update_policy, prev.update_policy
            )));
        }
        if self.value_type != prev.value_type {
            return Err(self.incompatible(format!(
                "value type mismatch ({} vs {})",
                self.value_type, prev.value_type
            )));
        }

        for (key, prev_value) in &prev.kv {
            match self.kv.get(key) {
                None => {
                    if self.deleted_prefixes.iter().any(|p| key.starts_with(p)) {
                        continue;
                    }
                    self.kv.insert(key.clone(), prev_value.clone());
                }
                Some(latest_value) => {
                    let resolved = match self.update_policy {
                        UpdatePolicy::Set | UpdatePolicy::Replace => None,
                        UpdatePolicy::SetIfNotExists | UpdatePolicy::Ignore => {
                            Some(prev_value.clone())
                        }
                        UpdatePolicy::Append => {
                            let mut combined =
                                Vec::with_capacity(prev_value.len() + latest_value.len());
                            combined.extend_from_slice(prev_value);
                            combined.extend_from_slice(latest_value);
                            Some(Bytes::from(combined))
                        }
                        UpdatePolicy::Sum => Some(Bytes::from(combine_numeric(
                            NumericOp::Sum,
                            self.value_type,
                            prev_value,
                            latest_value,
                        )?)),
                        UpdatePolicy::Min => Some(Bytes::from(combine_numeric(
                            NumericOp::Min,
                            self.value_type,
                            prev_value,
                            latest_value,
                        )?)),
                        UpdatePolicy::Max => Some(Bytes::from(combine_numeric(
                            NumericOp::Max,
                            self.value_type,
                            prev_value,
                            latest_value,
                        )?)),
                    };
                    if let Some(value) = resolved {
                        self.kv.insert(key.clone(), value);
                    }
                }
            }
        }

        for prefix in &prev.deleted_prefixes {
            if !self.deleted_prefixes.iter().any(|p| p == prefix) {
                self.deleted_prefixes.push(prefix.clone());
            }
        }
        Ok(())
    }

    fn incompatible(&self, reason: String) -> Error {
        Error::IncompatibleMerge {
            store: self.name.clone(),
            reason,
        }
    }

    fn apply_delta(&mut self, delta: &Delta) {
        match delta.op {
            DeltaOp::Create | DeltaOp::Update => {
                self.kv.insert(delta.key.clone(), delta.new_value.clone());
            }
            DeltaOp::Delete => {
                self.kv.remove(&delta.key);
            }
        }
    }

    fn check_reserved(&self, key: &str) -> Result<()> {
        if key.starts_with(RESERVED_PREFIX) {
            return Err(Error::ReservedKey {
                prefix: RESERVED_PREFIX,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn bump_ordinal(&mut self, ord: u64) -> Result<()> {
        if ord < self.last_ordinal {
            return Err(Error::OrdinalReversed {
                ordinal: ord,
                watermark: self.last_ordinal,
                store: self.name.clone(),
            });
        }
        self.last_ordinal = ord;
        Ok(())
    }
}
