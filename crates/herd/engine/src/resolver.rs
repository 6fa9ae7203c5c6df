//! Dependency ordering of work items

use crate::error::CycleError;
use herd_types::WorkItem;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Linearize `items` so every item follows its resolvable dependencies.
///
/// Depth-first, post-order, starting traversals in input order; items with no
/// dependency relation keep their relative input order. A `depends_on` entry
/// naming no item is skipped with a warning.
pub fn order(items: &[WorkItem]) -> Result<Vec<WorkItem>, CycleError> {
    let by_name: HashMap<&str, &WorkItem> =
        items.iter().map(|item| (item.name.as_str(), item)).collect();

    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    let mut sorted = Vec::with_capacity(items.len());

    for item in items {
        if !visited.contains(item.name.as_str()) {
            visit(item, &by_name, &mut visited, &mut stack, &mut sorted)?;
        }
    }

    Ok(sorted.into_iter().cloned().collect())
}

/// Item names in dependency order
pub fn order_names(items: &[WorkItem]) -> Result<Vec<String>, CycleError> {
    Ok(order(items)?.into_iter().map(|item| item.name).collect())
}

fn visit<'a>(
    item: &'a WorkItem,
    by_name: &HashMap<&'a str, &'a WorkItem>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    sorted: &mut Vec<&'a WorkItem>,
) -> Result<(), CycleError> {
    visited.insert(item.name.as_str());
    stack.push(item.name.as_str());

    for dep in &item.depends_on {
        let Some(next) = by_name.get(dep.as_str()).copied() else {
            warn!(item = %item.name, dependency = %dep, "Dependency not found, ignoring");
            continue;
        };

        if let Some(start) = stack.iter().position(|name| *name == next.name) {
            let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            path.push(next.name.clone());
            return Err(CycleError { path });
        }

        if !visited.contains(next.name.as_str()) {
            visit(next, by_name, visited, stack, sorted)?;
        }
    }

    stack.pop();
    sorted.push(item);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_types::{StepType, WorkItem};
    use proptest::prelude::*;

    fn item(name: &str, deps: &[&str]) -> WorkItem {
        WorkItem::step(name, StepType::Service).depends_on(deps.iter().copied())
    }

    #[test]
    fn test_chain_in_reverse_input_order() {
        let items = vec![item("C", &["B"]), item("A", &[]), item("B", &["A"])];
        assert_eq!(order_names(&items).unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_independent_items_keep_input_order() {
        let items = vec![item("x", &[]), item("y", &[]), item("z", &[])];
        assert_eq!(order_names(&items).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_dependencies_visited_in_listed_order() {
        let items = vec![
            item("app", &["cache", "db"]),
            item("db", &[]),
            item("cache", &[]),
        ];
        assert_eq!(order_names(&items).unwrap(), vec!["cache", "db", "app"]);
    }

    #[test]
    fn test_two_cycle() {
        let items = vec![item("A", &["B"]), item("B", &["A"])];
        let err = order(&items).unwrap_err();
        assert_eq!(err.path, vec!["A", "B", "A"]);
        assert_eq!(err.to_string(), "Circular dependency detected: A -> B -> A");
    }

    #[test]
    fn test_cycle_reported_from_its_start() {
        let items = vec![
            item("root", &["a"]),
            item("a", &["b"]),
            item("b", &["c"]),
            item("c", &["a"]),
        ];
        assert_eq!(order(&items).unwrap_err().path, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let items = vec![item("solo", &["solo"])];
        assert_eq!(order(&items).unwrap_err().path, vec!["solo", "solo"]);
    }

    #[test]
    fn test_missing_dependency_is_ignored() {
        let items = vec![item("b", &["X", "a"]), item("a", &[])];
        assert_eq!(order_names(&items).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_diamond() {
        let items = vec![
            item("top", &["left", "right"]),
            item("left", &["base"]),
            item("right", &["base"]),
            item("base", &[]),
        ];
        assert_eq!(
            order_names(&items).unwrap(),
            vec!["base", "left", "right", "top"]
        );
    }

    /// Acyclic graphs: each item may only depend on items with a lower index
    /// in a hidden ranking, then the input is shuffled.
    fn arb_dag() -> impl Strategy<Value = Vec<WorkItem>> {
        (1usize..12)
            .prop_flat_map(|n| {
                let deps = prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), n);
                (Just(n), deps, Just((0..n).collect::<Vec<_>>()).prop_shuffle())
            })
            .prop_map(|(n, deps, perm)| {
                let items: Vec<WorkItem> = (0..n)
                    .map(|i| {
                        let names: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            deps[i].iter().map(|ix| format!("n{}", ix.index(i))).collect()
                        };
                        WorkItem::step(format!("n{i}"), StepType::Service).depends_on(names)
                    })
                    .collect();
                perm.iter().map(|&i| items[i].clone()).collect::<Vec<_>>()
            })
    }

    proptest! {
        #[test]
        fn prop_dependencies_come_first(items in arb_dag()) {
            let sorted = order_names(&items).unwrap();
            prop_assert_eq!(sorted.len(), items.len());

            let position: HashMap<&str, usize> =
                sorted.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
            for item in &items {
                for dep in &item.depends_on {
                    prop_assert!(position[dep.as_str()] < position[item.name.as_str()]);
                }
            }
        }

        #[test]
        fn prop_unrelated_items_keep_input_order(n in 1usize..10) {
            let items: Vec<WorkItem> = (0..n)
                .map(|i| WorkItem::step(format!("s{i}"), StepType::Llm))
                .collect();
            let expected: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
            prop_assert_eq!(order_names(&items).unwrap(), expected);
        }
    }
}
