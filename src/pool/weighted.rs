use std::sync::Arc;

use crate::connection::{same_connection, DatabaseConnection};

/// Flattened weighted list of read connections
///
/// Each connection appears in the list exactly as many times as its weight,
/// so a uniform draw over the list is a weighted draw over the connections.
/// Weight-0 entries never make it into the list.
#[derive(Clone)]
pub struct WeightedSet {
    connections: Vec<Arc<dyn DatabaseConnection>>,
}

impl WeightedSet {
    /// Flatten `(connection, weight)` pairs into a selection list
    pub fn new(entries: &[(Arc<dyn DatabaseConnection>, u32)]) -> Self {
        let mut connections = Vec::new();
        for (connection, weight) in entries {
            for _ in 0..*weight {
                connections.push(connection.clone());
            }
        }
        Self { connections }
    }

    /// Multiplicity of a connection in the list (0 if absent)
    pub fn weight_of(&self, connection: &Arc<dyn DatabaseConnection>) -> usize {
        self.connections
            .iter()
            .filter(|c| same_connection(c, connection))
            .count()
    }

    /// The flattened list, in construction order
    pub fn connections(&self) -> &[Arc<dyn DatabaseConnection>] {
        &self.connections
    }

    /// Total number of entries (sum of all weights)
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the read pool is empty (every read falls back to master)
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::StubConnection;

    fn as_dyn(stub: &Arc<StubConnection>) -> Arc<dyn DatabaseConnection> {
        stub.clone()
    }

    #[test]
    fn test_flatten_lengths() {
        let r1 = StubConnection::arc("r1");
        let r2 = StubConnection::arc("r2");
        let set = WeightedSet::new(&[(as_dyn(&r1), 1), (as_dyn(&r2), 2)]);

        assert_eq!(set.len(), 3);
        assert_eq!(set.weight_of(&as_dyn(&r1)), 1);
        assert_eq!(set.weight_of(&as_dyn(&r2)), 2);
    }

    #[test]
    fn test_zero_weight_excluded() {
        let r1 = StubConnection::arc("r1");
        let r2 = StubConnection::arc("r2");
        let set = WeightedSet::new(&[(as_dyn(&r1), 0), (as_dyn(&r2), 3)]);

        assert_eq!(set.len(), 3);
        assert_eq!(set.weight_of(&as_dyn(&r1)), 0);
        assert_eq!(set.weight_of(&as_dyn(&r2)), 3);
    }

    #[test]
    fn test_absent_connection_weight_is_zero() {
        let r1 = StubConnection::arc("r1");
        let other = StubConnection::arc("other");
        let set = WeightedSet::new(&[(as_dyn(&r1), 2)]);

        assert_eq!(set.weight_of(&as_dyn(&other)), 0);
    }

    #[test]
    fn test_empty_set() {
        let set = WeightedSet::new(&[]);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
