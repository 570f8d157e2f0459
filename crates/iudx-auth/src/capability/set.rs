//! Fixed-width capability sets.

use std::fmt;

/// Capabilities a single server may define for one role.
pub const MAX_CAPABILITIES: usize = 64;

/// Position of a capability in its server's enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityId(pub(crate) u8);

impl CapabilityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A set of capabilities of one server, as a bitmask over [`CapabilityId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u64);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    pub fn insert(&mut self, id: CapabilityId) {
        self.0 |= 1 << id.0;
    }

    pub fn contains(&self, id: CapabilityId) -> bool {
        self.0 & (1 << id.0) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Members of `self` not in `other`.
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_subset(self, other: Self) -> bool {
        self.difference(other).is_empty()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in ascending id order.
    pub fn iter(self) -> impl Iterator<Item = CapabilityId> {
        (0..MAX_CAPABILITIES as u8)
            .map(CapabilityId)
            .filter(move |id| self.contains(*id))
    }
}

impl FromIterator<CapabilityId> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityId>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.0)).finish()
    }
}
