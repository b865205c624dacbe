use std::collections::{BTreeSet, HashSet};

use crate::{GroupId, GuildGraph, PermissionNode, RoleId};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("stored inheritance chain of group {group} loops back on itself")]
    InheritanceCycle { group: GroupId },
}

/// The literal set of nodes a member holds. Wildcards stay unexpanded and are
/// evaluated by [`HeldNodes::satisfies`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldNodes(BTreeSet<PermissionNode>);

impl HeldNodes {
    #[must_use]
    pub fn new(nodes: BTreeSet<PermissionNode>) -> Self {
        Self(nodes)
    }

    #[must_use]
    pub fn satisfies(&self, required: &PermissionNode) -> bool {
        self.0.iter().any(|held| held.satisfies(required))
    }

    #[must_use]
    pub fn contains(&self, node: &PermissionNode) -> bool {
        self.0.contains(node)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeSet<PermissionNode> {
        self.0
    }
}

/// Computes the nodes held by a member with `roles` in `graph`.
///
/// Entry groups are the groups bound to any of `roles`. Each entry group's
/// parent chain is followed to its root and every visited group's own nodes
/// are collected. A parent id that no longer exists ends the chain.
///
/// # Errors
/// Returns [`ResolveError::InheritanceCycle`] if a parent chain revisits a group.
pub fn resolve(graph: &GuildGraph, roles: &BTreeSet<RoleId>) -> Result<HeldNodes, ResolveError> {
    let mut held = BTreeSet::new();
    if roles.is_empty() {
        return Ok(HeldNodes(held));
    }

    let mut collected: HashSet<&GroupId> = HashSet::new();
    let entries = graph
        .groups()
        .iter()
        .filter(|group| group.roles.iter().any(|role| roles.contains(role)));

    for entry in entries {
        let mut walk: HashSet<&GroupId> = HashSet::new();
        let mut cursor = Some(entry);
        while let Some(group) = cursor {
            if !walk.insert(&group.id) {
                return Err(ResolveError::InheritanceCycle {
                    group: entry.id.clone(),
                });
            }
            // Everything above an already collected group was collected with it.
            if !collected.insert(&group.id) {
                break;
            }
            held.extend(group.nodes.iter().cloned());
            cursor = group.parent.as_ref().and_then(|parent| graph.get(parent));
        }
    }

    Ok(HeldNodes(held))
}

#[cfg(test)]
mod tests {
    use super::{resolve, HeldNodes, ResolveError};
    use crate::{GroupId, GroupName, GuildGraph, PermissionNode, RoleId};
    use std::collections::BTreeSet;

    fn gid(value: &str) -> GroupId {
        GroupId::try_from(value).unwrap()
    }

    fn node(value: &str) -> PermissionNode {
        PermissionNode::try_from(value).unwrap()
    }

    fn role(value: u64) -> RoleId {
        RoleId::try_from(value).unwrap()
    }

    fn roles(values: &[u64]) -> BTreeSet<RoleId> {
        values.iter().copied().map(role).collect()
    }

    fn chain_graph() -> GuildGraph {
        let mut graph = GuildGraph::new();
        for (id, granted) in [("a", "x.read"), ("b", "y.read"), ("c", "z.read")] {
            graph
                .create_group(gid(id), GroupName::try_from(id).unwrap())
                .unwrap();
            graph.grant_node(&gid(id), node(granted)).unwrap();
        }
        graph.set_inheritance(&gid("a"), &gid("b")).unwrap();
        graph.set_inheritance(&gid("b"), &gid("c")).unwrap();
        graph.assign_role(&gid("a"), role(1)).unwrap();
        graph
    }

    #[test]
    fn resolve_unions_the_whole_parent_chain() {
        let held = resolve(&chain_graph(), &roles(&[1])).unwrap();
        let expected: BTreeSet<PermissionNode> =
            [node("x.read"), node("y.read"), node("z.read")].into();
        assert_eq!(held.into_inner(), expected);
    }

    #[test]
    fn resolve_only_enters_groups_bound_to_member_roles() {
        let mut graph = chain_graph();
        graph.assign_role(&gid("b"), role(2)).unwrap();

        let held = resolve(&graph, &roles(&[2])).unwrap();
        assert!(!held.contains(&node("x.read")));
        assert!(held.contains(&node("y.read")));
        assert!(held.contains(&node("z.read")));

        assert!(resolve(&graph, &roles(&[99])).unwrap().is_empty());
        assert!(resolve(&graph, &BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn resolve_merges_overlapping_chains() {
        let mut graph = chain_graph();
        graph
            .create_group(gid("d"), GroupName::try_from("D").unwrap())
            .unwrap();
        graph.grant_node(&gid("d"), node("x.read")).unwrap();
        graph.grant_node(&gid("d"), node("tickets.*")).unwrap();
        graph.set_inheritance(&gid("d"), &gid("c")).unwrap();
        graph.assign_role(&gid("d"), role(3)).unwrap();

        let held = resolve(&graph, &roles(&[1, 3])).unwrap();
        assert_eq!(held.len(), 4);
        assert!(held.satisfies(&node("tickets.create")));
    }

    #[test]
    fn resolve_does_not_expand_wildcards() {
        let mut graph = GuildGraph::new();
        graph
            .create_group(gid("mods"), GroupName::try_from("Mods").unwrap())
            .unwrap();
        graph.grant_node(&gid("mods"), node("moderation.*")).unwrap();
        graph.assign_role(&gid("mods"), role(5)).unwrap();

        let held = resolve(&graph, &roles(&[5])).unwrap();
        assert_eq!(held.len(), 1);
        assert!(held.contains(&node("moderation.*")));
        assert!(held.satisfies(&node("moderation.ban")));
        assert!(!held.satisfies(&node("tickets.create")));
    }

    #[test]
    fn resolve_treats_dangling_parent_as_root() {
        let graph: GuildGraph = serde_json::from_str(
            r#"[{"id":"a","name":"A","roles":[1],"nodes":["x.read"],"parent":"gone"}]"#,
        )
        .unwrap();
        let held = resolve(&graph, &roles(&[1])).unwrap();
        assert!(held.contains(&node("x.read")));
    }

    #[test]
    fn resolve_detects_cycles_in_stored_data() {
        let graph: GuildGraph = serde_json::from_str(
            r#"[
                {"id":"a","name":"A","roles":[1],"parent":"b"},
                {"id":"b","name":"B","parent":"c"},
                {"id":"c","name":"C","parent":"b"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            resolve(&graph, &roles(&[1])).unwrap_err(),
            ResolveError::InheritanceCycle { group: gid("a") }
        );
    }

    #[test]
    fn empty_held_set_satisfies_nothing() {
        assert!(!HeldNodes::default().satisfies(&node("anything")));
    }
}
