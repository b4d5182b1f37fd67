//! Schema reference graph resolution
//!
//! References point at exact (subject, version) pairs, but cycles are
//! detected at subject granularity: a reference must name an
//! already-active version, so version-level edges can never close a loop,
//! and the subject graph is where the acyclicity invariant is meaningful.
//! The resolver also produces the deterministic topological order the
//! compatibility checker and deletion logic consume.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{RegistryError, Result};
use crate::schema::{Reference, SchemaVersion};
use crate::state::GlobalState;

/// Stateless resolver over a [`GlobalState`] snapshot
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Validate a candidate's references and return their transitive
    /// closure in topological order, dependencies first, ties broken by
    /// subject name then version.
    pub fn resolve(
        candidate_subject: &str,
        references: &[Reference],
        state: &GlobalState,
    ) -> Result<Vec<SchemaVersion>> {
        for reference in references {
            let active = state
                .version(&reference.subject, reference.version)
                .map(|v| v.is_active())
                .unwrap_or(false);
            if !active {
                return Err(RegistryError::DanglingReference {
                    subject: reference.subject.clone(),
                    version: reference.version,
                });
            }
        }

        Self::check_cycles(candidate_subject, references, state)?;
        Self::closure_in_order(references, state)
    }

    /// Transitive closure texts without the candidate cycle check, for
    /// parsing schemas already committed to the (acyclic) state.
    pub fn dependency_closure(
        references: &[Reference],
        state: &GlobalState,
    ) -> Result<Vec<SchemaVersion>> {
        Self::closure_in_order(references, state)
    }

    /// Labels ("subject@version") of active versions that reference the
    /// given version. Non-empty means the version cannot be deleted.
    pub fn referrers(subject: &str, version: u32, state: &GlobalState) -> Vec<String> {
        let mut out = Vec::new();
        for other in state.subjects() {
            for v in state.active_versions(other) {
                let points_here = v
                    .schema
                    .references
                    .iter()
                    .any(|r| r.subject == subject && r.version == version);
                if points_here {
                    out.push(format!("{}@{}", v.subject, v.version));
                }
            }
        }
        out.sort();
        out
    }

    /// DFS over the subject graph, starting from the candidate's proposed
    /// edges; reaching the candidate subject again is a cycle.
    fn check_cycles(
        candidate_subject: &str,
        references: &[Reference],
        state: &GlobalState,
    ) -> Result<()> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();

        let mut node_of = |graph: &mut DiGraph<String, ()>, name: &str| -> NodeIndex {
            *nodes
                .entry(name.to_string())
                .or_insert_with(|| graph.add_node(name.to_string()))
        };

        let candidate = node_of(&mut graph, candidate_subject);
        for subject in state.subjects().map(str::to_string).collect::<Vec<_>>() {
            for version in state.active_versions(&subject) {
                let from = node_of(&mut graph, &subject);
                for reference in &version.schema.references {
                    let to = node_of(&mut graph, &reference.subject);
                    graph.update_edge(from, to, ());
                }
            }
        }
        for reference in references {
            let to = node_of(&mut graph, &reference.subject);
            graph.update_edge(candidate, to, ());
        }

        let mut path = vec![candidate_subject.to_string()];
        let mut visited = BTreeSet::new();
        if Self::dfs_reaches(&graph, candidate, candidate, &mut visited, &mut path) {
            return Err(RegistryError::CyclicReference {
                subject: candidate_subject.to_string(),
                path,
            });
        }
        Ok(())
    }

    fn dfs_reaches(
        graph: &DiGraph<String, ()>,
        current: NodeIndex,
        target: NodeIndex,
        visited: &mut BTreeSet<NodeIndex>,
        path: &mut Vec<String>,
    ) -> bool {
        for next in graph.neighbors(current) {
            if next == target {
                path.push(graph[next].clone());
                return true;
            }
            if visited.insert(next) {
                path.push(graph[next].clone());
                if Self::dfs_reaches(graph, next, target, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Kahn's algorithm restricted to the closure, always emitting the
    /// smallest ready (subject, version) so the order is deterministic.
    fn closure_in_order(
        references: &[Reference],
        state: &GlobalState,
    ) -> Result<Vec<SchemaVersion>> {
        type Key = (String, u32);

        let mut members: BTreeMap<Key, SchemaVersion> = BTreeMap::new();
        let mut pending: Vec<Reference> = references.to_vec();
        while let Some(reference) = pending.pop() {
            let key = (reference.subject.clone(), reference.version);
            if members.contains_key(&key) {
                continue;
            }
            let version = state
                .version(&reference.subject, reference.version)
                .filter(|v| v.is_active())
                .ok_or_else(|| RegistryError::DanglingReference {
                    subject: reference.subject.clone(),
                    version: reference.version,
                })?;
            pending.extend(version.schema.references.iter().cloned());
            members.insert(key, version.clone());
        }

        let mut unresolved: BTreeMap<Key, BTreeSet<Key>> = members
            .iter()
            .map(|(key, version)| {
                let deps: BTreeSet<Key> = version
                    .schema
                    .references
                    .iter()
                    .map(|r| (r.subject.clone(), r.version))
                    .filter(|dep| members.contains_key(dep))
                    .collect();
                (key.clone(), deps)
            })
            .collect();

        let mut ordered = Vec::with_capacity(members.len());
        while !unresolved.is_empty() {
            let ready = unresolved
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(key, _)| key.clone());
            // The state graph is acyclic by construction; a stall would
            // mean a corrupted snapshot.
            let key = ready.ok_or_else(|| {
                RegistryError::StateFailed("reference closure contains a cycle".to_string())
            })?;
            unresolved.remove(&key);
            for deps in unresolved.values_mut() {
                deps.remove(&key);
            }
            ordered.push(members[&key].clone());
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::CompatibilityMode;
    use crate::log::record::{RecordValue, RegisterRecord};
    use crate::schema::SchemaFormat;
    use chrono::Utc;

    fn register(
        state: GlobalState,
        offset: u64,
        subject: &str,
        version: u32,
        canonical: &str,
        references: Vec<Reference>,
    ) -> GlobalState {
        let record = RecordValue::Register(RegisterRecord {
            subject: subject.to_string(),
            version,
            schema_id: None,
            canonical_schema: canonical.to_string(),
            format: SchemaFormat::Avro,
            references,
            registered_at: Utc::now(),
        });
        state.apply(offset, &record).unwrap().0
    }

    fn base_state() -> GlobalState {
        let state = GlobalState::new(CompatibilityMode::Backward);
        let state = register(state, 0, "leaf", 1, r#""string""#, vec![]);
        let state = register(state, 1, "mid", 1, r#""int""#, vec![Reference::new("leaf", 1)]);
        register(state, 2, "other", 1, r#""long""#, vec![])
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let state = base_state();
        let err = ReferenceResolver::resolve("top", &[Reference::new("leaf", 9)], &state)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DanglingReference { .. }));
    }

    #[test]
    fn test_closure_is_transitive_and_dependency_first() {
        let state = base_state();
        let order = ReferenceResolver::resolve("top", &[Reference::new("mid", 1)], &state).unwrap();
        let labels: Vec<String> = order.iter().map(|v| v.subject.clone()).collect();
        assert_eq!(labels, vec!["leaf", "mid"]);
    }

    #[test]
    fn test_cycle_back_to_candidate_rejected() {
        // mid already references leaf; a new leaf version referencing mid
        // would close leaf -> mid -> leaf at subject granularity.
        let state = base_state();
        let err = ReferenceResolver::resolve("leaf", &[Reference::new("mid", 1)], &state)
            .unwrap_err();
        match err {
            RegistryError::CyclicReference { subject, path } => {
                assert_eq!(subject, "leaf");
                assert_eq!(path.first().map(String::as_str), Some("leaf"));
                assert_eq!(path.last().map(String::as_str), Some("leaf"));
            }
            other => panic!("expected CyclicReference, got {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_subjects_do_not_trip_cycle_check() {
        let state = base_state();
        let order =
            ReferenceResolver::resolve("top", &[Reference::new("other", 1)], &state).unwrap();
        assert_eq!(order.len(), 1);
    }

    #[test]
    fn test_referrers_lists_active_dependents() {
        let state = base_state();
        assert_eq!(ReferenceResolver::referrers("leaf", 1, &state), vec!["mid@1"]);
        assert!(ReferenceResolver::referrers("other", 1, &state).is_empty());
    }

    #[test]
    fn test_tie_break_by_subject_then_version() {
        let state = GlobalState::new(CompatibilityMode::Backward);
        let state = register(state, 0, "b", 1, r#""string""#, vec![]);
        let state = register(state, 1, "a", 1, r#""int""#, vec![]);
        let state = register(state, 2, "a", 2, r#""long""#, vec![]);
        let order = ReferenceResolver::resolve(
            "top",
            &[
                Reference::new("b", 1),
                Reference::new("a", 2),
                Reference::new("a", 1),
            ],
            &state,
        )
        .unwrap();
        let keys: Vec<(String, u32)> = order
            .iter()
            .map(|v| (v.subject.clone(), v.version))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 1)
            ]
        );
    }
}
