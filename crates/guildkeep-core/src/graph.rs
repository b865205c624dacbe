use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{GroupId, GroupName, PermissionGroup, PermissionNode, RoleId};

pub const MAX_GUILD_GROUPS: usize = 64;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("permission group {0} not found")]
    GroupNotFound(GroupId),
    #[error("permission group {0} already exists")]
    GroupAlreadyExists(GroupId),
    #[error("permission group {0} cannot inherit from itself")]
    SelfInheritance(GroupId),
    #[error("inheriting {group} from {parent} would create a cycle")]
    InheritanceCycle { group: GroupId, parent: GroupId },
    #[error("guild already has the maximum of {max} permission groups")]
    GroupLimitReached { max: usize },
}

/// One guild's permission groups, kept in creation order.
///
/// Every mutation validates before it touches the graph, so an `Err` always
/// leaves the graph exactly as it was. Mutations that would not change
/// anything return `Ok(false)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildGraph {
    groups: Vec<PermissionGroup>,
}

impl GuildGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[must_use]
    pub fn groups(&self) -> &[PermissionGroup] {
        &self.groups
    }

    #[must_use]
    pub fn get(&self, id: &GroupId) -> Option<&PermissionGroup> {
        self.groups.iter().find(|group| &group.id == id)
    }

    fn get_mut(&mut self, id: &GroupId) -> Result<&mut PermissionGroup, GraphError> {
        self.groups
            .iter_mut()
            .find(|group| &group.id == id)
            .ok_or_else(|| GraphError::GroupNotFound(id.clone()))
    }

    /// Checks invariants that deserialized data must hold before it is trusted.
    ///
    /// # Errors
    /// Returns [`GraphError::GroupAlreadyExists`] if two groups share an id.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::with_capacity(self.groups.len());
        for group in &self.groups {
            if !seen.insert(&group.id) {
                return Err(GraphError::GroupAlreadyExists(group.id.clone()));
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`GraphError::GroupAlreadyExists`] if `id` is taken, or
    /// [`GraphError::GroupLimitReached`] once the guild holds [`MAX_GUILD_GROUPS`].
    pub fn create_group(
        &mut self,
        id: GroupId,
        name: GroupName,
    ) -> Result<&PermissionGroup, GraphError> {
        if self.get(&id).is_some() {
            return Err(GraphError::GroupAlreadyExists(id));
        }
        if self.groups.len() >= MAX_GUILD_GROUPS {
            return Err(GraphError::GroupLimitReached {
                max: MAX_GUILD_GROUPS,
            });
        }
        self.groups.push(PermissionGroup::new(id, name));
        Ok(&self.groups[self.groups.len() - 1])
    }

    /// Removes a group. Children of the removed group become roots.
    ///
    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn delete_group(&mut self, id: &GroupId) -> Result<PermissionGroup, GraphError> {
        let index = self
            .groups
            .iter()
            .position(|group| &group.id == id)
            .ok_or_else(|| GraphError::GroupNotFound(id.clone()))?;
        let removed = self.groups.remove(index);
        for group in &mut self.groups {
            if group.parent.as_ref() == Some(id) {
                group.parent = None;
            }
        }
        Ok(removed)
    }

    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn rename_group(&mut self, id: &GroupId, name: GroupName) -> Result<bool, GraphError> {
        let group = self.get_mut(id)?;
        if group.name == name {
            return Ok(false);
        }
        group.name = name;
        Ok(true)
    }

    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn assign_role(&mut self, id: &GroupId, role: RoleId) -> Result<bool, GraphError> {
        Ok(self.get_mut(id)?.roles.insert(role))
    }

    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn unassign_role(&mut self, id: &GroupId, role: RoleId) -> Result<bool, GraphError> {
        Ok(self.get_mut(id)?.roles.remove(&role))
    }

    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn grant_node(&mut self, id: &GroupId, node: PermissionNode) -> Result<bool, GraphError> {
        Ok(self.get_mut(id)?.nodes.insert(node))
    }

    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn revoke_node(&mut self, id: &GroupId, node: &PermissionNode) -> Result<bool, GraphError> {
        Ok(self.get_mut(id)?.nodes.remove(node))
    }

    /// Makes `parent` the parent of `id`.
    ///
    /// The prospective parent's whole chain is walked before anything changes.
    ///
    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if either group is absent,
    /// [`GraphError::SelfInheritance`] if `parent == id`, or
    /// [`GraphError::InheritanceCycle`] if `id` is already an ancestor of `parent`.
    pub fn set_inheritance(&mut self, id: &GroupId, parent: &GroupId) -> Result<bool, GraphError> {
        let current = self
            .get(id)
            .ok_or_else(|| GraphError::GroupNotFound(id.clone()))?;
        if self.get(parent).is_none() {
            return Err(GraphError::GroupNotFound(parent.clone()));
        }
        if id == parent {
            return Err(GraphError::SelfInheritance(id.clone()));
        }
        if current.parent.as_ref() == Some(parent) {
            return Ok(false);
        }
        self.ensure_acyclic_edge(id, parent)?;

        self.get_mut(id)?.parent = Some(parent.clone());
        Ok(true)
    }

    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent.
    pub fn clear_inheritance(&mut self, id: &GroupId) -> Result<bool, GraphError> {
        Ok(self.get_mut(id)?.parent.take().is_some())
    }

    /// The group itself followed by each ancestor up to its root.
    ///
    /// # Errors
    /// Returns [`GraphError::GroupNotFound`] if `id` is absent, or
    /// [`GraphError::InheritanceCycle`] if stored data contains a loop.
    pub fn inheritance_chain(&self, id: &GroupId) -> Result<Vec<GroupId>, GraphError> {
        let mut group = self
            .get(id)
            .ok_or_else(|| GraphError::GroupNotFound(id.clone()))?;
        let mut chain = vec![group.id.clone()];
        let mut visited = HashSet::from([&group.id]);
        while let Some(parent_id) = group.parent.as_ref() {
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            if !visited.insert(&parent.id) {
                return Err(GraphError::InheritanceCycle {
                    group: group.id.clone(),
                    parent: parent.id.clone(),
                });
            }
            chain.push(parent.id.clone());
            group = parent;
        }
        Ok(chain)
    }

    fn ensure_acyclic_edge(&self, id: &GroupId, parent: &GroupId) -> Result<(), GraphError> {
        let cycle = || GraphError::InheritanceCycle {
            group: id.clone(),
            parent: parent.clone(),
        };
        let mut visited = HashSet::new();
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == id || !visited.insert(ancestor) {
                return Err(cycle());
            }
            cursor = self.get(ancestor).and_then(|group| group.parent.as_ref());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{GraphError, GuildGraph, MAX_GUILD_GROUPS};
    use crate::{GroupId, GroupName, PermissionNode, RoleId};

    fn gid(value: &str) -> GroupId {
        GroupId::try_from(value).unwrap()
    }

    fn graph_with(ids: &[&str]) -> GuildGraph {
        let mut graph = GuildGraph::new();
        for id in ids {
            graph
                .create_group(gid(id), GroupName::try_from(*id).unwrap())
                .unwrap();
        }
        graph
    }

    #[test]
    fn create_group_rejects_duplicates_and_keeps_order() {
        let mut graph = graph_with(&["admins", "mods", "helpers"]);
        let error = graph
            .create_group(gid("mods"), GroupName::try_from("Again").unwrap())
            .unwrap_err();
        assert_eq!(error, GraphError::GroupAlreadyExists(gid("mods")));

        let order: Vec<&str> = graph.groups().iter().map(|g| g.id.as_str()).collect();
        assert_eq!(order, ["admins", "mods", "helpers"]);
    }

    #[test]
    fn create_group_enforces_guild_limit() {
        let mut graph = GuildGraph::new();
        for index in 0..MAX_GUILD_GROUPS {
            let id = format!("group-{index}");
            graph
                .create_group(gid(&id), GroupName::try_from(id.as_str()).unwrap())
                .unwrap();
        }
        let error = graph
            .create_group(gid("overflow"), GroupName::try_from("overflow").unwrap())
            .unwrap_err();
        assert_eq!(error, GraphError::GroupLimitReached { max: MAX_GUILD_GROUPS });
    }

    #[test]
    fn role_and_node_toggles_are_idempotent() {
        let mut graph = graph_with(&["mods"]);
        let role = RoleId::try_from(42_u64).unwrap();
        let node = PermissionNode::try_from("moderation.ban").unwrap();

        assert!(graph.assign_role(&gid("mods"), role).unwrap());
        assert!(!graph.assign_role(&gid("mods"), role).unwrap());
        assert!(graph.grant_node(&gid("mods"), node.clone()).unwrap());
        assert!(!graph.grant_node(&gid("mods"), node.clone()).unwrap());

        let group = graph.get(&gid("mods")).unwrap();
        assert_eq!(group.roles.len(), 1);
        assert_eq!(group.nodes.len(), 1);

        assert!(graph.unassign_role(&gid("mods"), role).unwrap());
        assert!(!graph.unassign_role(&gid("mods"), role).unwrap());
        assert!(graph.revoke_node(&gid("mods"), &node).unwrap());
        assert!(!graph.revoke_node(&gid("mods"), &node).unwrap());

        assert_eq!(
            graph.assign_role(&gid("ghosts"), role).unwrap_err(),
            GraphError::GroupNotFound(gid("ghosts"))
        );
    }

    #[test]
    fn set_inheritance_rejects_self_and_missing_groups() {
        let mut graph = graph_with(&["a", "b"]);
        assert_eq!(
            graph.set_inheritance(&gid("a"), &gid("a")).unwrap_err(),
            GraphError::SelfInheritance(gid("a"))
        );
        assert_eq!(
            graph.set_inheritance(&gid("a"), &gid("zz")).unwrap_err(),
            GraphError::GroupNotFound(gid("zz"))
        );
        assert_eq!(
            graph.set_inheritance(&gid("zz"), &gid("a")).unwrap_err(),
            GraphError::GroupNotFound(gid("zz"))
        );
    }

    #[test]
    fn set_inheritance_rejects_cycles_without_mutating() {
        let mut graph = graph_with(&["a", "b", "c"]);
        assert!(graph.set_inheritance(&gid("a"), &gid("b")).unwrap());
        assert!(graph.set_inheritance(&gid("b"), &gid("c")).unwrap());
        let before = graph.clone();

        assert_eq!(
            graph.set_inheritance(&gid("b"), &gid("a")).unwrap_err(),
            GraphError::InheritanceCycle {
                group: gid("b"),
                parent: gid("a"),
            }
        );
        assert_eq!(
            graph.set_inheritance(&gid("c"), &gid("a")).unwrap_err(),
            GraphError::InheritanceCycle {
                group: gid("c"),
                parent: gid("a"),
            }
        );
        assert_eq!(graph, before);
    }

    #[test]
    fn set_inheritance_to_current_parent_is_noop() {
        let mut graph = graph_with(&["a", "b"]);
        assert!(graph.set_inheritance(&gid("a"), &gid("b")).unwrap());
        assert!(!graph.set_inheritance(&gid("a"), &gid("b")).unwrap());
        assert!(graph.clear_inheritance(&gid("a")).unwrap());
        assert!(!graph.clear_inheritance(&gid("a")).unwrap());
        assert!(graph.get(&gid("a")).unwrap().is_root());
    }

    #[test]
    fn rename_group_reports_change_only_for_new_names() {
        let mut graph = graph_with(&["mods"]);
        let staff = GroupName::try_from("Staff").unwrap();
        assert!(graph.rename_group(&gid("mods"), staff.clone()).unwrap());
        assert!(!graph.rename_group(&gid("mods"), staff.clone()).unwrap());
        assert_eq!(graph.get(&gid("mods")).unwrap().name, staff);
        assert_eq!(
            graph.rename_group(&gid("ghost"), staff).unwrap_err(),
            GraphError::GroupNotFound(gid("ghost"))
        );
    }

    #[test]
    fn delete_group_orphans_children() {
        let mut graph = graph_with(&["root", "mid", "leaf", "other"]);
        graph.set_inheritance(&gid("mid"), &gid("root")).unwrap();
        graph.set_inheritance(&gid("leaf"), &gid("mid")).unwrap();
        graph.set_inheritance(&gid("other"), &gid("mid")).unwrap();

        let removed = graph.delete_group(&gid("mid")).unwrap();
        assert_eq!(removed.parent, Some(gid("root")));
        assert!(graph.get(&gid("leaf")).unwrap().is_root());
        assert!(graph.get(&gid("other")).unwrap().is_root());
        assert!(graph.get(&gid("mid")).is_none());
        assert_eq!(
            graph.delete_group(&gid("mid")).unwrap_err(),
            GraphError::GroupNotFound(gid("mid"))
        );
    }

    #[test]
    fn inheritance_chain_walks_to_root() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.set_inheritance(&gid("a"), &gid("b")).unwrap();
        graph.set_inheritance(&gid("b"), &gid("c")).unwrap();
        assert_eq!(
            graph.inheritance_chain(&gid("a")).unwrap(),
            vec![gid("a"), gid("b"), gid("c")]
        );
        assert_eq!(graph.inheritance_chain(&gid("c")).unwrap(), vec![gid("c")]);
    }

    #[test]
    fn inheritance_chain_reports_stored_cycles() {
        let graph: GuildGraph = serde_json::from_str(
            r#"[{"id":"a","name":"A","parent":"b"},{"id":"b","name":"B","parent":"a"}]"#,
        )
        .unwrap();
        assert!(matches!(
            graph.inheritance_chain(&gid("a")).unwrap_err(),
            GraphError::InheritanceCycle { .. }
        ));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let graph: GuildGraph =
            serde_json::from_str(r#"[{"id":"a","name":"A"},{"id":"a","name":"B"}]"#).unwrap();
        assert_eq!(
            graph.validate().unwrap_err(),
            GraphError::GroupAlreadyExists(gid("a"))
        );
        assert!(graph_with(&["a", "b"]).validate().is_ok());
    }
}
