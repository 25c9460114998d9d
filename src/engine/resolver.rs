use crate::domain::resource::ResourceType;
use crate::engine::store::ResourceStore;
use serde_json::Value;

/// Owner chains are short in practice (service -> device); the cap only
/// guards against malformed self-referential data.
const MAX_DEPTH: u8 = 4;

#[derive(PartialEq, Debug)]
pub enum Resolution {
    Device(String),
    Unresolved,
}

/// Walks a resource's `owner` references until a device is reached. Non-device
/// owners are looked up in the store and their own owner is followed.
pub fn resolve_owner(store: &ResourceStore, resource: &Value) -> Resolution {
    resolve_at_depth(store, resource, 0)
}

fn resolve_at_depth(store: &ResourceStore, resource: &Value, depth: u8) -> Resolution {
    if depth >= MAX_DEPTH {
        return Resolution::Unresolved;
    }

    let owner = &resource["owner"];
    let (Some(rid), Some(rtype_str)) = (owner["rid"].as_str(), owner["rtype"].as_str()) else {
        return Resolution::Unresolved;
    };

    if rtype_str == "device" {
        return Resolution::Device(rid.to_string());
    }

    let Some(rtype) = ResourceType::parse(rtype_str) else {
        return Resolution::Unresolved;
    };
    match store.find(rtype, rid) {
        Some(owning_resource) => resolve_at_depth(store, owning_resource, depth + 1),
        None => Resolution::Unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn resolves_a_direct_device_owner() {
        let store = ResourceStore::new();
        let resource = json!({ "id": "l1", "owner": { "rid": "d1", "rtype": "device" } });

        assert_eq!(resolve_owner(&store, &resource), Resolution::Device("d1".to_string()));
    }

    #[test]
    fn follows_an_indirect_owner_through_the_store() {
        let mut store = ResourceStore::new();
        store.put_snapshot(
            ResourceType::Light,
            vec![json!({ "id": "l1", "owner": { "rid": "d1", "rtype": "device" } })],
        );
        let resource = json!({ "id": "x1", "owner": { "rid": "l1", "rtype": "light" } });

        assert_eq!(resolve_owner(&store, &resource), Resolution::Device("d1".to_string()));
    }

    #[test]
    fn unknown_owner_types_stay_unresolved() {
        let store = ResourceStore::new();
        let resource = json!({ "id": "x1", "owner": { "rid": "h1", "rtype": "bridge_home" } });

        assert_eq!(resolve_owner(&store, &resource), Resolution::Unresolved);
    }

    #[test]
    fn a_missing_owner_field_stays_unresolved() {
        let store = ResourceStore::new();

        assert_eq!(resolve_owner(&store, &json!({ "id": "x1" })), Resolution::Unresolved);
    }

    #[test]
    fn a_self_referential_owner_terminates() {
        let mut store = ResourceStore::new();
        store.put_snapshot(
            ResourceType::Light,
            vec![json!({ "id": "l1", "owner": { "rid": "l1", "rtype": "light" } })],
        );
        let resource = json!({ "id": "x1", "owner": { "rid": "l1", "rtype": "light" } });

        assert_eq!(resolve_owner(&store, &resource), Resolution::Unresolved);
    }
}
