//! Topological sort and transitive reduction of task edges.

use std::collections::VecDeque;

use fixedbitset::FixedBitSet;

use crate::graph::GraphError;

/// Order `count` vertices so every `(before, after)` edge points forward.
pub(crate) fn topological_order(
    count: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<usize>, GraphError> {
    let mut in_degree = vec![0u32; count];
    let mut successors = vec![Vec::new(); count];
    for &(before, after) in edges {
        in_degree[after] += 1;
        successors[before].push(after);
    }

    let mut queue: VecDeque<usize> = (0..count).filter(|&v| in_degree[v] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(v) = queue.pop_front() {
        order.push(v);
        for &next in &successors[v] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != count {
        return Err(GraphError::CyclicDependency);
    }
    Ok(order)
}

/// Drop every edge implied by a longer path.
///
/// Output is sorted and free of duplicates. Fails on cycles.
pub(crate) fn transitive_reduction(
    count: usize,
    edges: &[(usize, usize)],
) -> Result<Vec<(usize, usize)>, GraphError> {
    let order = topological_order(count, edges)?;
    let mut position = vec![0usize; count];
    for (index, &v) in order.iter().enumerate() {
        position[v] = index;
    }

    let mut successors = vec![Vec::new(); count];
    for &(before, after) in edges {
        successors[before].push(after);
    }
    for list in &mut successors {
        list.sort_unstable_by_key(|&v| position[v]);
        list.dedup();
    }

    // reach[v]: vertices reachable from v through at least one edge
    let mut reach = vec![FixedBitSet::with_capacity(count); count];
    let mut reduced = Vec::new();
    for &v in order.iter().rev() {
        let mut covered = FixedBitSet::with_capacity(count);
        // nearest successors first: a farther one is redundant if a nearer one reaches it
        for &next in &successors[v] {
            if !covered.contains(next) {
                reduced.push((v, next));
                covered.insert(next);
                covered.union_with(&reach[next]);
            }
        }
        reach[v] = covered;
    }

    reduced.sort_unstable();
    Ok(reduced)
}
