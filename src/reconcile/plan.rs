use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::models::security::PvmKey;
use crate::registry::Registry;

/// State transition plan computed from the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Old pair -> new pairs every holder of the old pair must receive.
    #[serde(serialize_with = "serialize_transitions")]
    pub add: BTreeMap<PvmKey, BTreeSet<PvmKey>>,
    /// Pairs to strip from every role and then delete.
    pub del_role_pvm: BTreeSet<PvmKey>,
    pub del_resources: BTreeSet<String>,
    pub del_permissions: BTreeSet<String>,
}

#[derive(Serialize)]
struct Transition<'a> {
    from: &'a PvmKey,
    to: &'a BTreeSet<PvmKey>,
}

fn serialize_transitions<S>(
    add: &BTreeMap<PvmKey, BTreeSet<PvmKey>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(add.len()))?;
    for (from, to) in add {
        seq.serialize_element(&Transition { from, to })?;
    }
    seq.end()
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.del_role_pvm.is_empty()
            && self.del_resources.is_empty()
            && self.del_permissions.is_empty()
    }

    fn add_transition(&mut self, old: PvmKey, new: PvmKey) {
        self.del_role_pvm.insert(old.clone());
        self.del_resources.insert(old.resource.clone());
        self.del_permissions.insert(old.permission.clone());
        self.add.entry(old).or_default().insert(new);
    }

    /// Keeps everything a registered descriptor still uses.
    fn prune(&mut self, registry: &Registry) {
        for descriptor in registry.descriptors() {
            self.del_resources.remove(descriptor.name());
            for permission in descriptor.required_permissions() {
                self.del_role_pvm
                    .remove(&PvmKey::new(descriptor.name(), &permission));
                self.del_permissions.remove(&permission);
            }
        }
    }
}

/// Builds the transition plan. Pure: reads the registry only.
pub fn build_plan(registry: &Registry) -> Plan {
    let mut plan = Plan::default();

    for descriptor in registry.descriptors() {
        let renamed = descriptor.resource_renamed();
        if !renamed && !descriptor.has_previous_permissions() {
            continue;
        }

        let old_resource = descriptor.old_name();
        for (old_permission, permission) in descriptor.permission_transitions() {
            plan.add_transition(
                PvmKey::new(old_resource, old_permission),
                PvmKey::new(descriptor.name(), permission),
            );
        }
    }

    plan.prune(registry);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceDescriptor;

    fn key(resource: &str, permission: &str) -> PvmKey {
        PvmKey::new(resource, permission)
    }

    #[test]
    fn unchanged_registry_yields_empty_plan() {
        let mut registry = Registry::new();
        registry.register(ResourceDescriptor::new("UserView").operation("list"));
        assert!(build_plan(&registry).is_empty());
    }

    #[test]
    fn resource_rename_moves_every_permission() {
        let mut registry = Registry::new();
        registry.register(
            ResourceDescriptor::new("UserAdmin")
                .previous_name("UserView")
                .operation("list")
                .operation("show"),
        );

        let plan = build_plan(&registry);
        assert_eq!(
            plan.add.get(&key("UserView", "can_list")),
            Some(&BTreeSet::from([key("UserAdmin", "can_list")]))
        );
        assert_eq!(
            plan.add.get(&key("UserView", "can_show")),
            Some(&BTreeSet::from([key("UserAdmin", "can_show")]))
        );
        assert_eq!(plan.del_resources, BTreeSet::from(["UserView".to_string()]));
        // permissions are still used by the new resource
        assert!(plan.del_permissions.is_empty());
        assert_eq!(plan.del_role_pvm.len(), 2);
    }

    #[test]
    fn aggregation_fans_in() {
        let mut registry = Registry::new();
        registry.register(
            ResourceDescriptor::new("Reports")
                .operation_with_permission("foo", "combo")
                .operation_with_permission("bar", "combo")
                .previous_permission("foo", "foo")
                .previous_permission("bar", "bar"),
        );

        let plan = build_plan(&registry);
        let target = BTreeSet::from([key("Reports", "can_combo")]);
        assert_eq!(plan.add.get(&key("Reports", "can_foo")), Some(&target));
        assert_eq!(plan.add.get(&key("Reports", "can_bar")), Some(&target));
        assert!(plan.del_resources.is_empty());
        assert_eq!(
            plan.del_permissions,
            BTreeSet::from(["can_bar".to_string(), "can_foo".to_string()])
        );
    }

    #[test]
    fn renamed_aggregate_migrates_unmapped_operations() {
        let mut registry = Registry::new();
        registry.register(
            ResourceDescriptor::new("UserAdmin")
                .previous_name("UserView")
                .operation_with_permission("foo", "combo")
                .operation_with_permission("baz", "combo")
                .previous_permission("foo", "foo"),
        );

        let plan = build_plan(&registry);
        let target = BTreeSet::from([key("UserAdmin", "can_combo")]);
        assert_eq!(plan.add.get(&key("UserView", "can_combo")), Some(&target));
        assert_eq!(plan.add.get(&key("UserView", "can_foo")), Some(&target));
        assert_eq!(
            plan.del_role_pvm,
            BTreeSet::from([key("UserView", "can_combo"), key("UserView", "can_foo")])
        );
        assert_eq!(plan.del_resources, BTreeSet::from(["UserView".to_string()]));
        assert_eq!(plan.del_permissions, BTreeSet::from(["can_foo".to_string()]));
    }

    #[test]
    fn renaming_to_itself_deletes_nothing() {
        let mut registry = Registry::new();
        registry.register(
            ResourceDescriptor::new("UserView")
                .previous_name("UserView")
                .operation("list")
                .previous_permission("list", "list"),
        );

        let plan = build_plan(&registry);
        assert!(plan.del_role_pvm.is_empty());
        assert!(plan.del_resources.is_empty());
        assert!(plan.del_permissions.is_empty());
    }

    #[test]
    fn permission_kept_while_another_descriptor_requires_it() {
        let mut registry = Registry::new();
        registry.register(
            ResourceDescriptor::new("Reports")
                .operation("export")
                .previous_permission("export", "download"),
        );
        registry.register(ResourceDescriptor::new("Files").operation("download"));

        let plan = build_plan(&registry);
        assert!(plan.del_role_pvm.contains(&key("Reports", "can_download")));
        assert!(plan.del_permissions.is_empty());
    }

    #[test]
    fn plan_serializes_transitions_as_list() {
        let mut registry = Registry::new();
        registry.register(
            ResourceDescriptor::new("UserAdmin")
                .previous_name("UserView")
                .operation("list"),
        );

        let value = serde_json::to_value(build_plan(&registry)).unwrap();
        assert_eq!(
            value["add"],
            serde_json::json!([{
                "from": {"resource": "UserView", "permission": "can_list"},
                "to": [{"resource": "UserAdmin", "permission": "can_list"}]
            }])
        );
        assert_eq!(value["del_resources"], serde_json::json!(["UserView"]));
    }
}
