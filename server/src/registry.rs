//! Registry of named custom audiences
//!
//! Groups live in a sharded concurrent map. Each group's member set sits
//! behind an `Arc` and is replaced copy-on-write: a writer holding the shard
//! lock either mutates the set in place (no reader holds it) or clones it
//! first. Readers clone the `Arc` and drop the shard lock straight away, so
//! a member list handed out by [`AudienceRegistry::members_of`] is always a
//! complete set as of one instant and is never mutated underneath its holder.
//!
//! Groups that become empty are pruned; an absent group and an empty group
//! answer every query identically.

use dashmap::DashMap;
use log::debug;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::recipient::Recipient;

pub const DEFAULT_NAMESPACE: &str = "server";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupKeyError {
    #[error("group key is empty")]
    Empty,
    #[error("invalid character {character:?} in group key {key:?}")]
    InvalidCharacter { key: String, character: char },
}

/// Namespaced name of a custom audience, written `namespace:value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    namespace: String,
    value: String,
}

impl GroupKey {
    pub fn new(namespace: &str, value: &str) -> Result<Self, GroupKeyError> {
        validate(namespace, false)?;
        validate(value, true)?;
        Ok(Self {
            namespace: namespace.to_string(),
            value: value.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

fn validate(part: &str, allow_slash: bool) -> Result<(), GroupKeyError> {
    if part.is_empty() {
        return Err(GroupKeyError::Empty);
    }
    let invalid = part.chars().find(|c| {
        !(c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || matches!(c, '_' | '-' | '.')
            || (allow_slash && *c == '/'))
    });
    match invalid {
        Some(character) => Err(GroupKeyError::InvalidCharacter {
            key: part.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

impl FromStr for GroupKey {
    type Err = GroupKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, value)) => GroupKey::new(namespace, value),
            None => GroupKey::new(DEFAULT_NAMESPACE, s),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.value)
    }
}

/// Immutable member set of one group, as of the moment it was read
pub type MemberSet = Arc<HashSet<Recipient>>;

#[derive(Default)]
pub struct AudienceRegistry {
    groups: DashMap<GroupKey, MemberSet>,
}

impl AudienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a recipient to a group, creating the group if needed
    ///
    /// Returns false if the recipient was already a member.
    pub fn register(&self, key: &GroupKey, recipient: Recipient) -> bool {
        let mut members = self.groups.entry(key.clone()).or_default();
        if members.contains(&recipient) {
            return false;
        }
        Arc::make_mut(members.value_mut()).insert(recipient)
    }

    /// Removes a recipient from a group; absent members are ignored
    pub fn unregister(&self, key: &GroupKey, recipient: &Recipient) -> bool {
        let removed = match self.groups.get_mut(key) {
            Some(mut members) if members.contains(recipient) => {
                Arc::make_mut(members.value_mut()).remove(recipient)
            }
            _ => false,
        };
        if removed && self.groups.remove_if(key, |_, members| members.is_empty()).is_some() {
            debug!("Pruned empty group {}", key);
        }
        removed
    }

    /// Removes a recipient from every group, returning the groups it left
    pub fn unregister_all(&self, recipient: &Recipient) -> Vec<GroupKey> {
        self.groups_of(recipient)
            .into_iter()
            .filter(|key| self.unregister(key, recipient))
            .collect()
    }

    pub fn contains(&self, key: &GroupKey, recipient: &Recipient) -> bool {
        self.groups
            .get(key)
            .is_some_and(|members| members.contains(recipient))
    }

    /// Every group the recipient currently belongs to
    pub fn groups_of(&self, recipient: &Recipient) -> HashSet<GroupKey> {
        self.groups
            .iter()
            .filter(|entry| entry.value().contains(recipient))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Members of a group; empty when the group does not exist
    pub fn members_of(&self, key: &GroupKey) -> MemberSet {
        self.groups
            .get(key)
            .map(|members| Arc::clone(members.value()))
            .unwrap_or_default()
    }

    /// Members of any group that satisfy `predicate`, without duplicates
    pub fn filter<P>(&self, predicate: P) -> Vec<Recipient>
    where
        P: Fn(&Recipient) -> bool,
    {
        let mut seen = HashSet::new();
        for members in self.member_sets() {
            for recipient in members.iter() {
                if predicate(recipient) {
                    seen.insert(recipient.clone());
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Members of every group, without duplicates
    pub fn all(&self) -> Vec<Recipient> {
        self.filter(|_| true)
    }

    pub fn groups(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = self.groups.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of non-empty groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    // Clone the set handles out first so no shard lock is held while
    // callers' predicates run
    fn member_sets(&self) -> Vec<MemberSet> {
        self.groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
