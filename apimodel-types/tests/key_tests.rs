use apimodel_types::{EntityKey, EntityTypeId};
use proptest::prelude::*;
use std::collections::HashSet;

// ── EntityTypeId ────────────────────────────────────────────────

#[test]
fn type_ids_are_unique() {
    let a = EntityTypeId::next();
    let b = EntityTypeId::next();
    assert_ne!(a, b);
    assert!(b.as_u64() > a.as_u64());
}

#[test]
fn type_id_display() {
    let id = EntityTypeId::next();
    assert_eq!(id.to_string(), format!("t{}", id.as_u64()));
}

#[test]
fn type_id_serde_is_transparent() {
    let id = EntityTypeId::next();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, id.as_u64().to_string());
}

// ── EntityKey ───────────────────────────────────────────────────

#[test]
fn key_accessors() {
    let t = EntityTypeId::next();
    let key = EntityKey::new(t, "42");
    assert_eq!(key.type_id(), t);
    assert_eq!(key.identity(), "42");
}

#[test]
fn same_parts_are_equal() {
    let t = EntityTypeId::next();
    let mut set = HashSet::new();
    set.insert(EntityKey::new(t, "1"));
    set.insert(EntityKey::new(t, "1"));
    assert_eq!(set.len(), 1);
}

#[test]
fn same_identity_different_type_differs() {
    let a = EntityKey::new(EntityTypeId::next(), "1");
    let b = EntityKey::new(EntityTypeId::next(), "1");
    assert_ne!(a, b);
}

proptest! {
    /// Distinct (type, identity) pairs never compare equal.
    #[test]
    fn keys_are_injective(
        id_a in "[a-z0-9/]{0,8}",
        id_b in "[a-z0-9/]{0,8}",
        same_type in any::<bool>(),
    ) {
        let ta = EntityTypeId::next();
        let tb = if same_type { ta } else { EntityTypeId::next() };
        let a = EntityKey::new(ta, id_a.clone());
        let b = EntityKey::new(tb, id_b.clone());
        prop_assert_eq!(a == b, same_type && id_a == id_b);
    }
}
