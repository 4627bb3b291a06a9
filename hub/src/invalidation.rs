//! Consumer side of the cache invalidation protocol.
//!
//! A consumer receives an `invalidate` envelope and needs to know which of its
//! local cache partitions to drop. Known keys map to one or more partitions;
//! unknown keys fall back to the raw key so new key names keep working without
//! a client change.

use crate::message::InvalidationInstruction;
use log::*;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Default)]
pub struct InvalidationResolver {
    key_map: HashMap<String, Vec<String>>,
    event_map: HashMap<String, Vec<String>>,
}

impl InvalidationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a query key to the local partitions it covers.
    pub fn with_key<I, S>(mut self, key: impl Into<String>, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_map
            .insert(key.into(), partitions.into_iter().map(Into::into).collect());
        self
    }

    /// Map an event tag to the local partitions it covers.
    pub fn with_event<I, S>(mut self, event_tag: impl Into<String>, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_map.insert(
            event_tag.into(),
            partitions.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Partitions to invalidate for `instruction`, deduplicated in first-seen order.
    ///
    /// Query keys win over the event tag. An instruction with neither resolves to nothing.
    pub fn resolve(&self, instruction: &InvalidationInstruction) -> Vec<String> {
        if !instruction.target_keys.is_empty() {
            return dedup(
                instruction
                    .target_keys
                    .iter()
                    .flat_map(|key| Self::lookup(&self.key_map, key)),
            );
        }

        match instruction.event_tag.as_deref() {
            Some(tag) if !tag.is_empty() => dedup(Self::lookup(&self.event_map, tag)),
            _ => {
                warn!("Invalidation instruction carries neither query keys nor an event tag");
                Vec::new()
            }
        }
    }

    fn lookup(map: &HashMap<String, Vec<String>>, token: &str) -> Vec<String> {
        match map.get(token) {
            Some(partitions) => partitions.clone(),
            None => {
                debug!("No mapping for '{token}', invalidating it verbatim");
                vec![token.to_string()]
            }
        }
    }
}

fn dedup(tokens: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}
