//! Dependency ordering for capability ids.
//!
//! Two views of the same graph: [`topological_order`] sorts a set of ids so
//! every id comes after the dependencies that are also in the set (Kahn's
//! algorithm, stable with respect to input order), and [`load_sequence`]
//! walks the full dependency closure of one id depth-first to produce the
//! order in which it and everything it needs must be loaded.
//!
//! Both fail with [`Error::CyclicDependency`] instead of looping.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Kahn's-algorithm sort of `ids`, restricted to the dependency edges
/// among them.
///
/// `deps_of` returns the declared dependencies of an id (`None` for ids the
/// caller doesn't know; those are treated as having no dependencies).
/// Duplicates in `ids` are collapsed. Ties are broken by input order.
pub fn topological_order<'a, F>(ids: &[String], deps_of: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut order: Vec<&str> = Vec::with_capacity(ids.len());
    let mut seen: HashSet<&str> = HashSet::new();
    for id in ids {
        if seen.insert(id.as_str()) {
            order.push(id.as_str());
        }
    }

    // Edge dep -> dependent, for deps inside the set only.
    let mut in_degree: HashMap<&str, usize> = order.iter().map(|id| (*id, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for &id in &order {
        let Some(deps) = deps_of(id) else { continue };
        for dep in deps {
            if dep != id && seen.contains(dep.as_str()) {
                *in_degree.entry(id).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(id);
            }
        }
    }

    let mut queue: VecDeque<&str> = order
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    let mut sorted = Vec::with_capacity(order.len());

    while let Some(id) = queue.pop_front() {
        sorted.push(id.to_string());
        let Some(next) = dependents.get(id) else { continue };
        for dependent in next {
            if let Some(deg) = in_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if sorted.len() < order.len() {
        let stuck = order
            .iter()
            .filter(|id| in_degree.get(*id).is_some_and(|d| *d > 0))
            .map(|id| id.to_string())
            .collect();
        return Err(Error::CyclicDependency(stuck));
    }

    Ok(sorted)
}

/// Depth-first post-order over the dependency closure of `root`.
///
/// The result lists dependencies before their dependents and ends with
/// `root`. `deps_of` returns `None` for ids that don't exist, which fails
/// with [`Error::CapabilityNotFound`].
pub fn load_sequence<'a, F>(root: &str, deps_of: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut sequence = Vec::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut path: Vec<String> = Vec::new();
    visit(root, &deps_of, &mut path, &mut done, &mut sequence)?;
    Ok(sequence)
}

fn visit<'a, F>(
    id: &str,
    deps_of: &F,
    path: &mut Vec<String>,
    done: &mut HashSet<String>,
    sequence: &mut Vec<String>,
) -> Result<()>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    if done.contains(id) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|p| p == id) {
        let mut cycle: Vec<String> = path[start..].to_vec();
        cycle.push(id.to_string());
        return Err(Error::CyclicDependency(cycle));
    }
    let deps = deps_of(id).ok_or_else(|| Error::CapabilityNotFound(id.to_string()))?;

    path.push(id.to_string());
    for dep in deps {
        visit(dep, deps_of, path, done, sequence)?;
    }
    path.pop();

    done.insert(id.to_string());
    sequence.push(id.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(id, deps)| {
                (
                    id.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn dependencies_come_first() {
        let g = graph(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        let order = topological_order(&ids(&["c", "b", "a"]), |id| {
            g.get(id).map(Vec::as_slice)
        })
        .unwrap();
        assert_eq!(order, ids(&["a", "b", "c"]));
    }

    #[test]
    fn diamond_respects_every_edge() {
        let g = graph(&[
            ("d", &["b", "c"]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("a", &[]),
        ]);
        let order = topological_order(&ids(&["d", "c", "b", "a"]), |id| {
            g.get(id).map(Vec::as_slice)
        })
        .unwrap();
        for (id, deps) in &g {
            for dep in deps {
                assert!(position(&order, dep) < position(&order, id));
            }
        }
    }

    #[test]
    fn edges_outside_the_set_are_ignored() {
        let g = graph(&[("b", &["a"]), ("c", &[])]);
        let order =
            topological_order(&ids(&["b", "c"]), |id| g.get(id).map(Vec::as_slice)).unwrap();
        assert_eq!(order, ids(&["b", "c"]));
    }

    #[test]
    fn independent_ids_keep_input_order() {
        let order = topological_order(&ids(&["x", "y", "z", "x"]), |_| None).unwrap();
        assert_eq!(order, ids(&["x", "y", "z"]));
    }

    #[test]
    fn topological_cycle_is_reported() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let err = topological_order(&ids(&["a", "b", "c"]), |id| g.get(id).map(Vec::as_slice))
            .unwrap_err();
        match err {
            Error::CyclicDependency(stuck) => {
                assert!(stuck.contains(&"a".to_string()));
                assert!(stuck.contains(&"b".to_string()));
                assert!(!stuck.contains(&"c".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn load_sequence_is_post_order() {
        let g = graph(&[
            ("stagewise", &["ui", "test"]),
            ("ui", &[]),
            ("test", &["code"]),
            ("code", &[]),
        ]);
        let seq = load_sequence("stagewise", |id| g.get(id).map(Vec::as_slice)).unwrap();
        assert_eq!(seq, ids(&["ui", "code", "test", "stagewise"]));
    }

    #[test]
    fn load_sequence_detects_cycle_with_path() {
        let g = graph(&[("smartui", &["ag_ui"]), ("ag_ui", &["smartui"])]);
        let err = load_sequence("smartui", |id| g.get(id).map(Vec::as_slice)).unwrap_err();
        assert_eq!(
            err,
            Error::CyclicDependency(ids(&["smartui", "ag_ui", "smartui"]))
        );
    }

    #[test]
    fn load_sequence_unknown_dependency() {
        let g = graph(&[("ops", &["monitoring"])]);
        let err = load_sequence("ops", |id| g.get(id).map(Vec::as_slice)).unwrap_err();
        assert_eq!(err, Error::CapabilityNotFound("monitoring".into()));
    }
}
