// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::{PackageGraph, Rejection};

fn deps(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_owned()).collect()
}

/// Indexes a chain of leaves and a package depending on all of them.
fn bootstrap() -> PackageGraph {
    let graph = PackageGraph::new();
    for leaf in ["a", "b", "c"] {
        graph.index(leaf, &[]).unwrap();
    }
    graph.index("d", &deps(&["a", "b", "c"])).unwrap();
    graph
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn bootstrap_and_query() {
    let graph = bootstrap();
    assert_eq!(graph.len(), 4);
    assert!(graph.query("d"));
    assert!(graph.query("a"));
    assert!(!graph.query("e"));
    assert_eq!(
        sorted(graph.dependencies_of("d").unwrap()),
        deps(&["a", "b", "c"])
    );
    assert_eq!(graph.dependees_of("a").unwrap(), deps(&["d"]));
}

#[test]
fn indexing_with_a_missing_dependency_is_refused() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();

    assert_eq!(
        graph.index("e", &deps(&["x"])),
        Err(Rejection::MissingDependency("x".to_owned()))
    );
    // And nothing was created.
    assert!(!graph.query("e"));
    assert_eq!(graph.len(), 1);
}

#[test]
fn a_new_package_cannot_bootstrap_through_itself() {
    let graph = PackageGraph::new();
    // "a" is not indexed yet, so listing it as a dependency fails on existence grounds.
    assert_eq!(
        graph.index("a", &deps(&["a"])),
        Err(Rejection::MissingDependency("a".to_owned()))
    );
    assert!(!graph.query("a"));
}

#[test]
fn self_dependency_is_refused_without_change() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();

    assert_eq!(graph.index("a", &deps(&["a"])), Err(Rejection::SelfDependency));
    assert!(graph.query("a"));
    assert_eq!(graph.dependencies_of("a").unwrap(), Vec::<String>::new());
}

#[test]
fn indirect_cycle_is_refused_without_change() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();
    graph.index("b", &deps(&["a"])).unwrap();
    graph.index("c", &deps(&["b"])).unwrap();

    assert_eq!(
        graph.index("a", &deps(&["c"])),
        Err(Rejection::WouldCreateCycle)
    );
    assert_eq!(graph.dependencies_of("a").unwrap(), Vec::<String>::new());
    assert_eq!(graph.dependees_of("c").unwrap(), Vec::<String>::new());
}

#[test]
fn cycle_check_only_considers_new_dependencies() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();
    graph.index("b", &deps(&["a"])).unwrap();
    graph.index("c", &deps(&["b"])).unwrap();

    // Keeping the existing dep while adding a fresh, harmless one is fine.
    graph.index("leaf", &[]).unwrap();
    graph.index("b", &deps(&["a", "leaf"])).unwrap();
    assert_eq!(
        sorted(graph.dependencies_of("b").unwrap()),
        deps(&["a", "leaf"])
    );

    // But adding an edge back up the chain is still caught.
    assert_eq!(
        graph.index("a", &deps(&["c"])),
        Err(Rejection::WouldCreateCycle)
    );
}

#[test]
fn reindexing_replaces_the_dependency_set() {
    let graph = bootstrap();

    graph.index("d", &deps(&["c"])).unwrap();
    assert_eq!(graph.dependencies_of("d").unwrap(), deps(&["c"]));
    assert_eq!(graph.dependees_of("a").unwrap(), Vec::<String>::new());

    // "a" no longer has dependees, so it can now be removed.
    graph.remove("a").unwrap();
    assert!(!graph.query("a"));
}

#[test]
fn reindexing_with_identical_dependencies_is_accepted() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();
    graph.index("b", &deps(&["a"])).unwrap();

    graph.index("b", &deps(&["a"])).unwrap();
    assert_eq!(graph.dependencies_of("b").unwrap(), deps(&["a"]));
    assert_eq!(graph.dependees_of("a").unwrap(), deps(&["b"]));
}

#[test]
fn duplicate_dependencies_collapse_to_one_edge() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();
    graph.index("b", &deps(&["a", "a", "a"])).unwrap();

    assert_eq!(graph.dependencies_of("b").unwrap(), deps(&["a"]));
    assert_eq!(graph.dependees_of("a").unwrap(), deps(&["b"]));
}

#[test]
fn removal_is_blocked_by_dependees() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();
    graph.index("b", &deps(&["a"])).unwrap();

    assert_eq!(graph.remove("a"), Err(Rejection::HasDependees(1)));
    assert!(graph.query("a"));

    graph.remove("b").unwrap();
    graph.remove("a").unwrap();
    assert!(!graph.query("a"));
    assert!(!graph.query("b"));
    assert_eq!(graph.len(), 0);
}

#[test]
fn removing_an_unindexed_package_is_a_noop() {
    let graph = bootstrap();
    graph.remove("nope").unwrap();
    graph.remove("nope").unwrap();
    assert_eq!(graph.len(), 4);
}

#[test]
fn removal_unlinks_the_package_from_its_dependencies() {
    let graph = PackageGraph::new();
    graph.index("a", &[]).unwrap();
    graph.index("b", &deps(&["a"])).unwrap();

    graph.remove("b").unwrap();
    assert_eq!(graph.dependees_of("a").unwrap(), Vec::<String>::new());
    graph.remove("a").unwrap();
}

#[test]
fn forward_and_backward_adjacency_stay_consistent() {
    let graph = PackageGraph::new();
    graph.index("base", &[]).unwrap();
    graph.index("left", &deps(&["base"])).unwrap();
    graph.index("right", &deps(&["base"])).unwrap();
    graph.index("top", &deps(&["left", "right"])).unwrap();
    graph.index("left", &deps(&["base", "right"])).unwrap();

    for package in ["base", "left", "right", "top"] {
        for dep in graph.dependencies_of(package).unwrap() {
            assert!(
                graph.dependees_of(&dep).unwrap().contains(&package.to_owned()),
                "{package} -> {dep} has no matching back edge"
            );
        }
        for dependee in graph.dependees_of(package).unwrap() {
            assert!(
                graph
                    .dependencies_of(&dependee)
                    .unwrap()
                    .contains(&package.to_owned()),
                "{dependee} -> {package} has no matching forward edge"
            );
        }
    }
}

#[test]
fn refused_mutations_leave_the_graph_unchanged() {
    let graph = bootstrap();
    let before_deps = sorted(graph.dependencies_of("d").unwrap());

    assert!(graph.index("d", &deps(&["a", "ghost"])).is_err());
    assert!(graph.index("a", &deps(&["d"])).is_err());
    assert!(graph.remove("a").is_err());

    assert_eq!(graph.len(), 4);
    assert_eq!(sorted(graph.dependencies_of("d").unwrap()), before_deps);
    assert_eq!(graph.dependees_of("a").unwrap(), deps(&["d"]));
}

#[test]
fn reindexing_can_deepen_a_chain_but_not_close_it() {
    let graph = PackageGraph::new();
    for name in ["e", "d", "c", "b", "a"] {
        graph.index(name, &[]).unwrap();
    }
    graph.index("a", &deps(&["b"])).unwrap();
    graph.index("b", &deps(&["c"])).unwrap();
    graph.index("c", &deps(&["d"])).unwrap();
    graph.index("d", &deps(&["e"])).unwrap();

    assert_eq!(
        graph.index("e", &deps(&["a"])),
        Err(Rejection::WouldCreateCycle)
    );
    // The far end of the chain is still intact and removable from the top down.
    for name in ["a", "b", "c", "d", "e"] {
        graph.remove(name).unwrap();
    }
    assert_eq!(graph.len(), 0);
}
