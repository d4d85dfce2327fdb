//! Expression ordering for compute-at.
//!
//! Expressions are clustered by the loop group of their leaf axis at each depth: everything
//! sharing the outermost loop forms one cluster, recursively. Clusters are ordered
//! topologically by producer/consumer edges, ties broken by the lowest expression handle, so
//! the result is deterministic and computations sharing a loop stay adjacent.

use std::collections::{BTreeSet, HashMap};

use tessel_ir::{ExprId, Fusion, IdId};

use crate::IdGraphs;
use crate::error::{ExprSortCycleSnafu, Result};

struct Cluster {
    key: Option<IdId>,
    exprs: Vec<ExprId>,
}

#[tracing::instrument(skip_all)]
pub fn reorder_exprs_for_compute_at(fusion: &Fusion, graphs: &IdGraphs) -> Result<Vec<ExprId>> {
    let sorted = sort_at_depth(fusion, graphs, fusion.exprs(), 0)?;
    tracing::debug!(count = sorted.len(), "expressions sorted");
    Ok(sorted)
}

fn loop_key(fusion: &Fusion, graphs: &IdGraphs, expr: ExprId, depth: usize) -> Option<IdId> {
    let tv = fusion.expr(expr).output;
    fusion.tv(tv).leaf.get(depth).map(|id| graphs.loop_group(*id))
}

fn sort_at_depth(fusion: &Fusion, graphs: &IdGraphs, exprs: Vec<ExprId>, depth: usize) -> Result<Vec<ExprId>> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut by_key: HashMap<IdId, usize> = HashMap::new();
    for expr in exprs {
        match loop_key(fusion, graphs, expr, depth) {
            Some(key) => {
                let index = *by_key.entry(key).or_insert_with(|| {
                    clusters.push(Cluster { key: Some(key), exprs: Vec::new() });
                    clusters.len() - 1
                });
                clusters[index].exprs.push(expr);
            }
            None => clusters.push(Cluster { key: None, exprs: vec![expr] }),
        }
    }

    let owner: HashMap<ExprId, usize> =
        clusters.iter().enumerate().flat_map(|(i, c)| c.exprs.iter().map(move |e| (*e, i))).collect();
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); clusters.len()];
    let mut in_degree = vec![0usize; clusters.len()];
    for (index, cluster) in clusters.iter().enumerate() {
        let producers: BTreeSet<usize> = cluster
            .exprs
            .iter()
            .flat_map(|e| fusion.expr(*e).input_tvs())
            .filter_map(|tv| fusion.tv(tv).definition)
            .filter_map(|def| owner.get(&def).copied())
            .filter(|p| *p != index)
            .collect();
        for producer in producers {
            if dependents[producer].insert(index) {
                in_degree[index] += 1;
            }
        }
    }

    // Ready clusters keyed by their first expression.
    let mut ready: BTreeSet<(ExprId, usize)> =
        (0..clusters.len()).filter(|i| in_degree[*i] == 0).map(|i| (clusters[i].exprs[0], i)).collect();
    let mut order = Vec::with_capacity(clusters.len());
    while let Some((_, index)) = ready.pop_first() {
        order.push(index);
        for &next in &dependents[index] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert((clusters[next].exprs[0], next));
            }
        }
    }
    if order.len() != clusters.len() {
        let stuck: Vec<String> = (0..clusters.len())
            .filter(|i| in_degree[*i] > 0)
            .flat_map(|i| clusters[i].exprs.iter().map(|e| fusion.display_expr(*e).to_string()))
            .collect();
        return ExprSortCycleSnafu { exprs: stuck.join("; ") }.fail();
    }

    let mut sorted = Vec::new();
    let mut slots: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
    for index in order {
        let Some(cluster) = slots[index].take() else { continue };
        if cluster.key.is_some() && cluster.exprs.len() > 1 {
            sorted.extend(sort_at_depth(fusion, graphs, cluster.exprs, depth + 1)?);
        } else {
            sorted.extend(cluster.exprs);
        }
    }
    Ok(sorted)
}
