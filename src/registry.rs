use std::collections::BTreeMap;

/// Server-assigned connection identifier.
///
/// Ids come from a monotonically increasing counter, so ordering by id is
/// ordering by connect time.
pub type ConnectionId = u64;

#[derive(Debug)]
struct Entry<T> {
    name: String,
    outbound: T,
}

/// The live set of connections and their display names.
///
/// `T` is whatever the relay needs to reach a connection (an outbound queue
/// for real sockets). Names are not unique and are never validated.
#[derive(Debug)]
pub struct Registry<T> {
    entries: BTreeMap<ConnectionId, Entry<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `id`. An overwritten entry keeps its
    /// place in the presence order.
    pub fn add(&mut self, id: ConnectionId, name: impl Into<String>, outbound: T) {
        self.entries.insert(
            id,
            Entry {
                name: name.into(),
                outbound,
            },
        );
    }

    /// Remove the entry for `id`, returning its display name. Absent ids are
    /// not an error.
    pub fn remove(&mut self, id: ConnectionId) -> Option<String> {
        self.entries.remove(&id).map(|entry| entry.name)
    }

    /// Display names of every live connection, in insertion order.
    pub fn values(&self) -> Vec<String> {
        self.entries.values().map(|entry| entry.name.clone()).collect()
    }

    pub fn name(&self, id: ConnectionId) -> Option<&str> {
        self.entries.get(&id).map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every connection's outbound handle.
    pub fn outbound(&self) -> impl Iterator<Item = (ConnectionId, &T)> {
        self.entries.iter().map(|(&id, entry)| (id, &entry.outbound))
    }

    /// Outbound handles of every connection except `exclude`.
    pub fn others(&self, exclude: ConnectionId) -> impl Iterator<Item = (ConnectionId, &T)> {
        self.outbound().filter(move |&(id, _)| id != exclude)
    }
}
