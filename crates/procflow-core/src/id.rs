use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a placed equipment instance in the topology.
    pub struct EquipmentId;

    /// Identifies a pipe (or branch pipe) connection in the topology.
    pub struct PipeId;

    /// Identifies an injected fault record.
    pub struct FaultId;
}

/// Identifies an equipment kind in the registry. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KindId(pub u32);

/// Index of a port within its equipment kind's port list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortIndex(pub u16);

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn kind_id_equality() {
        assert_eq!(KindId(0), KindId(0));
        assert_ne!(KindId(0), KindId(1));
    }

    #[test]
    fn arena_keys_are_not_reused_with_same_version() {
        let mut arena: SlotMap<EquipmentId, u32> = SlotMap::with_key();
        let a = arena.insert(1);
        arena.remove(a);
        let b = arena.insert(2);
        assert_ne!(a, b);
        assert!(!arena.contains_key(a));
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(KindId(0), "pump");
        map.insert(KindId(1), "valve");
        assert_eq!(map[&KindId(0)], "pump");
    }
}
