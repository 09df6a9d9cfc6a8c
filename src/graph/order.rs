//! Topological ordering of the live vertices.

use std::collections::VecDeque;

use slotmap::{SecondaryMap, SlotMap};

use super::Vertex;
use crate::types::VertexId;

/// Result of ordering the graph.
#[derive(Debug, Default)]
pub(crate) struct Ordering {
    /// Every live vertex, producers before consumers. Where a cycle blocks
    /// the walk, it is broken at one of its members and the walk resumes,
    /// so vertices downstream of a cycle still follow their producers.
    pub(crate) order: Vec<VertexId>,
    /// The cycle members the walk was broken at, in the order it happened.
    pub(crate) cyclic: Vec<VertexId>,
}

/// Kahn's algorithm over the live vertices.
///
/// Invalidated vertices are skipped together with all their edges. The
/// queue is seeded in arena order so the result is deterministic for a given
/// sequence of graph mutations. When the queue runs dry with vertices left,
/// the first leftover in arena order leads back to a cycle; that cycle
/// member is placed as if its in-cycle edges did not exist.
pub(crate) fn topological_order(vertices: &SlotMap<VertexId, Vertex>) -> Ordering {
    let mut in_degree: SecondaryMap<VertexId, usize> = SecondaryMap::with_capacity(vertices.len());
    for (id, vertex) in vertices {
        if vertex.alive {
            in_degree.insert(id, 0);
        }
    }
    for (_, vertex) in vertices.iter().filter(|(_, v)| v.alive) {
        for &succ in &vertex.successors {
            if let Some(degree) = in_degree.get_mut(succ) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<VertexId> = vertices
        .keys()
        .filter(|id| in_degree.get(*id) == Some(&0))
        .collect();
    let mut placed: SecondaryMap<VertexId, ()> = SecondaryMap::with_capacity(in_degree.len());
    let mut order = Vec::with_capacity(in_degree.len());
    let mut cyclic = Vec::new();

    loop {
        while let Some(id) = queue.pop_front() {
            if placed.insert(id, ()).is_some() {
                continue;
            }
            order.push(id);
            for &succ in &vertices[id].successors {
                if placed.contains_key(succ) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }

        // Whatever is left sits on a cycle or behind one.
        let Some(stuck) = vertices
            .keys()
            .find(|id| in_degree.contains_key(*id) && !placed.contains_key(*id))
        else {
            break;
        };
        let member = cycle_member(vertices, &in_degree, &placed, stuck);
        cyclic.push(member);
        queue.push_back(member);
    }

    Ordering { order, cyclic }
}

/// Walk unplaced predecessors back from `start` until a vertex repeats.
///
/// Every unplaced vertex still has an unplaced live predecessor, so the
/// walk ends on a cycle.
fn cycle_member(
    vertices: &SlotMap<VertexId, Vertex>,
    in_degree: &SecondaryMap<VertexId, usize>,
    placed: &SecondaryMap<VertexId, ()>,
    start: VertexId,
) -> VertexId {
    let mut seen: SecondaryMap<VertexId, ()> = SecondaryMap::new();
    let mut current = start;
    while seen.insert(current, ()).is_none() {
        let predecessor = vertices[current]
            .predecessors
            .iter()
            .copied()
            .find(|p| in_degree.contains_key(*p) && !placed.contains_key(*p));
        match predecessor {
            Some(p) => current = p,
            None => break,
        }
    }
    current
}
