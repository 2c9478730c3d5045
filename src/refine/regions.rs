//! Grouping of affected regions for incremental refinement

use std::collections::{BTreeMap, HashMap};

use crate::graph::store::{GraphStore, NodeIdx};

/// Union-Find over a dense range of ids
pub struct DisjointSets {
    /// Parent pointers (parent[i] = parent of element i)
    parent: Vec<u32>,

    /// Size of each set, valid at roots
    size: Vec<u32>,
}

impl DisjointSets {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
            size: vec![1; len],
        }
    }

    /// Find the root of the set containing x, compressing the path
    pub fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cursor = x;
        while self.parent[cursor as usize] != root {
            let next = self.parent[cursor as usize];
            self.parent[cursor as usize] = root;
            cursor = next;
        }
        root
    }

    /// Union by size
    pub fn union(&mut self, x: u32, y: u32) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }

        if self.size[root_x as usize] >= self.size[root_y as usize] {
            self.parent[root_y as usize] = root_x;
            self.size[root_x as usize] += self.size[root_y as usize];
        } else {
            self.parent[root_x as usize] = root_y;
            self.size[root_y as usize] += self.size[root_x as usize];
        }
    }

    #[cfg(test)]
    fn size(&mut self, x: u32) -> u32 {
        let root = self.find(x);
        self.size[root as usize]
    }
}

/// Split a set of affected nodes into groups that can be refined
/// independently. Nodes that overlap or are joined by an edge land in the
/// same group, so no group reads a color another group writes.
///
/// Groups are ordered by their smallest node; members are sorted.
pub fn group_regions(store: &GraphStore, affected: &[NodeIdx]) -> Vec<Vec<NodeIdx>> {
    let mut affected = affected.to_vec();
    affected.sort_unstable();
    affected.dedup();

    let position: HashMap<NodeIdx, u32> = affected
        .iter()
        .enumerate()
        .map(|(pos, &node)| (node, pos as u32))
        .collect();

    let mut sets = DisjointSets::new(affected.len());
    for (&node, &pos) in &position {
        for other in store.adjacent(node) {
            if let Some(&other_pos) = position.get(&other) {
                sets.union(pos, other_pos);
            }
        }
    }

    let mut groups: BTreeMap<u32, Vec<NodeIdx>> = BTreeMap::new();
    for (pos, &node) in affected.iter().enumerate() {
        let root = sets.find(pos as u32);
        groups.entry(root).or_default().push(node);
    }

    let mut groups: Vec<Vec<NodeIdx>> = groups
        .into_values()
        .map(|mut members| {
            members.sort_unstable();
            members
        })
        .collect();
    groups.sort_unstable_by_key(|members| members.first().copied());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{Edge, Node};

    #[test]
    fn union_find_tracks_sizes() {
        let mut sets = DisjointSets::new(5);
        sets.union(0, 1);
        sets.union(3, 4);
        sets.union(1, 4);
        assert_eq!(sets.size(0), 4);
        assert_eq!(sets.find(3), sets.find(0));
        assert_eq!(sets.size(2), 1);
    }

    #[test]
    fn adjacent_regions_merge_and_distant_ones_stay_apart() {
        let mut store = GraphStore::new();
        for id in ["a", "b", "c", "d", "e"] {
            store.add_node(Node::new(id, "entity", 0.5)).unwrap();
        }
        store.add_edge(Edge::new("a", "b", "causes")).unwrap();
        store.add_edge(Edge::new("d", "e", "causes")).unwrap();

        assert_eq!(
            group_regions(&store, &[4, 0, 1, 3]),
            vec![vec![0, 1], vec![3, 4]]
        );
        assert_eq!(group_regions(&store, &[2]), vec![vec![2]]);
    }
}
