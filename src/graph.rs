use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::dot::Dot;

use crate::tree::{NodeId, Pid, ProcessTree, Simulation};

/// Edge view of a finished simulation: fork edges follow the tree structure
/// (parent pid to continuation pid, continuation pid to child pid), wait
/// edges point from the exited child to the process that waited on it.
#[derive(Debug, Clone, Default)]
pub struct ProcessGraph {
    pub fork_edges: Vec<(Pid, Pid)>,
    pub wait_edges: Vec<(Pid, Pid)>,
}

impl ProcessGraph {
    pub fn from_simulation(sim: &Simulation) -> Self {
        let mut fork_edges = vec![];
        collect_fork_edges(&sim.tree, sim.tree.root(), &mut fork_edges);
        Self {
            fork_edges,
            wait_edges: sim.wait_edges.clone(),
        }
    }

    /// Converts to a petgraph graph with pid-labelled nodes and edges tagged
    /// by kind, ready for dot rendering or further analysis.
    pub fn to_petgraph(&self) -> petgraph::Graph<String, &'static str> {
        let mut graph = petgraph::Graph::new();
        let mut indices = HashMap::new();

        let mut node = |graph: &mut petgraph::Graph<String, &'static str>, pid: Pid| {
            *indices
                .entry(pid)
                .or_insert_with(|| graph.add_node(pid.to_string()))
        };

        for &(from, to) in &self.fork_edges {
            let (a, b) = (node(&mut graph, from), node(&mut graph, to));
            graph.add_edge(a, b, "fork");
        }
        for &(from, to) in &self.wait_edges {
            let (a, b) = (node(&mut graph, from), node(&mut graph, to));
            graph.add_edge(a, b, "wait");
        }
        graph
    }

    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.to_petgraph(), &[]))
    }
}

fn collect_fork_edges(tree: &ProcessTree, node: NodeId, edges: &mut Vec<(Pid, Pid)>) {
    for next in [tree[node].continuation, tree[node].forked_child]
        .into_iter()
        .flatten()
    {
        edges.push((tree[node].pid, tree[next].pid));
        collect_fork_edges(tree, next, edges);
    }
}

/// CSV export over numeric process ids: deduplicated, sorted `child,parent`
/// rows (self edges between generations of one process are omitted) plus a
/// per-id aggregate of the output buffers.
pub fn tree_csv(tree: &ProcessTree) -> (String, Vec<String>) {
    let mut rows = BTreeSet::new();
    let mut values: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    collect_csv(tree, tree.root(), None, &mut rows, &mut values);

    let mut csv = String::from("child,parent");
    for (child, parent) in rows {
        csv.push_str(&format!("\n{child},{parent}"));
    }
    let labels = values
        .into_iter()
        .map(|(id, outs)| format!("{id}: [{}]", outs.join(",")))
        .collect();
    (csv, labels)
}

fn collect_csv(
    tree: &ProcessTree,
    node: NodeId,
    parent: Option<u64>,
    rows: &mut BTreeSet<(u64, u64)>,
    values: &mut BTreeMap<u64, Vec<String>>,
) {
    let id = tree[node].pid.id;
    if let Some(parent) = parent
        && parent != id
    {
        rows.insert((id, parent));
    }
    values.entry(id).or_default().push(tree[node].output.clone());

    for next in [tree[node].continuation, tree[node].forked_child]
        .into_iter()
        .flatten()
    {
        collect_csv(tree, next, Some(id), rows, values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use crate::tree::build;
    use pretty_assertions::assert_eq;

    #[test]
    fn csv_rows_are_sorted_and_deduplicated() {
        let sim = build(&parse("F(a,b)c").unwrap());
        let (csv, labels) = tree_csv(&sim.tree);
        assert_eq!(csv, "child,parent\n1,0");
        assert_eq!(labels, vec!["0: [,ac]", "1: [bc]"]);
    }

    #[test]
    fn csv_is_stable_across_builds() {
        let program = parse("F(F(a,b),c)d").unwrap();
        let one = tree_csv(&build(&program).tree);
        let two = tree_csv(&build(&program).tree);
        assert_eq!(one, two);
    }

    #[test]
    fn graph_carries_fork_and_wait_edges() {
        let sim = build(&parse("F(aWb,cX)").unwrap());
        let graph = ProcessGraph::from_simulation(&sim);
        assert_eq!(graph.fork_edges.len(), 2);
        assert_eq!(graph.wait_edges.len(), 1);

        let pg = graph.to_petgraph();
        assert_eq!(pg.node_count(), 3);
        assert_eq!(pg.edge_count(), 3);
        assert!(graph.to_dot().contains("wait"));
    }
}
