// src/relation/mod.rs
//! Neighbor relations in compressed-row form
//!
//! For every owner particle `i` the relation stores a contiguous run
//! `[first(i), last(i))` of neighbor indices together with the kernel
//! gradient magnitude `dW` and the unit direction `e` from `i` toward the
//! neighbor. Entries index into the neighbor body, which is the owner body
//! itself for an inner relation and another body for a contact relation.
//!
//! Relations are snapshots. Moving particles without rebuilding leaves the
//! relation stale, and nothing here detects that.

pub mod cell_list;

pub use cell_list::CellLinkedList;

use crate::execution::ExecutionPolicy;
use crate::kernel::SmoothingKernel;
use crate::math::{arrayi_splat, DeviceVec, Real, Vecd, DIMENSIONS, TINY_REAL};
use crate::mesh::for_each_cell;
use cgmath::InnerSpace;
use std::ops::Range;

/// One neighbor entry as seen by a kernel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub dw_ij: Real,
    pub e_ij: Vecd,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborRelation {
    offsets: Vec<usize>,
    neighbor_index: Vec<usize>,
    dw_ij: Vec<Real>,
    e_ij: Vec<Vecd>,
    cutoff_radius: Real,
}

impl NeighborRelation {
    /// Relation with `owners` particles and no neighbors
    pub fn empty(owners: usize, cutoff_radius: Real) -> Self {
        Self {
            offsets: vec![0; owners + 1],
            neighbor_index: Vec::new(),
            dw_ij: Vec::new(),
            e_ij: Vec::new(),
            cutoff_radius,
        }
    }

    /// Assembles a relation from per-owner neighbor lists
    pub fn from_lists(lists: Vec<Vec<Neighbor>>, cutoff_radius: Real) -> Self {
        let total: usize = lists.iter().map(Vec::len).sum();
        let mut relation = Self {
            offsets: Vec::with_capacity(lists.len() + 1),
            neighbor_index: Vec::with_capacity(total),
            dw_ij: Vec::with_capacity(total),
            e_ij: Vec::with_capacity(total),
            cutoff_radius,
        };

        relation.offsets.push(0);
        for list in lists {
            for neighbor in list {
                relation.neighbor_index.push(neighbor.index);
                relation.dw_ij.push(neighbor.dw_ij);
                relation.e_ij.push(neighbor.e_ij);
            }
            relation.offsets.push(relation.neighbor_index.len());
        }
        relation
    }

    pub fn owner_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn total_neighbors(&self) -> usize {
        self.neighbor_index.len()
    }

    pub fn cutoff_radius(&self) -> Real {
        self.cutoff_radius
    }

    pub fn first_neighbor(&self, i: usize) -> usize {
        self.offsets[i]
    }

    pub fn last_neighbor(&self, i: usize) -> usize {
        self.offsets[i + 1]
    }

    pub fn neighbor_range(&self, i: usize) -> Range<usize> {
        self.first_neighbor(i)..self.last_neighbor(i)
    }

    /// Lazy sequence of the neighbors of `i`; call again to restart
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = Neighbor> + '_ {
        self.neighbor_range(i).map(move |n| Neighbor {
            index: self.neighbor_index[n],
            dw_ij: self.dw_ij[n],
            e_ij: self.e_ij[n],
        })
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn neighbor_indices(&self) -> &[usize] {
        &self.neighbor_index
    }

    /// Offsets followed by neighbor indices, as one `u32` array
    pub fn device_topology(&self) -> Vec<u32> {
        self.offsets
            .iter()
            .chain(self.neighbor_index.iter())
            .map(|&v| v as u32)
            .collect()
    }

    /// Per-entry `vec4` with the direction in `xyz` and `dW` in `w`
    pub fn device_kernel_data(&self) -> Vec<DeviceVec> {
        self.e_ij
            .iter()
            .zip(&self.dw_ij)
            .map(|(e, dw)| crate::math::vecd_with_scalar_to_device(*e, *dw))
            .collect()
    }
}

fn search_cell_block<K, F>(
    cell_list: &CellLinkedList,
    target_positions: &[Vecd],
    position: Vecd,
    kernel: &K,
    mut skip: F,
) -> Vec<Neighbor>
where
    K: SmoothingKernel,
    F: FnMut(usize) -> bool,
{
    let mesh = cell_list.mesh();
    let cutoff = kernel.cutoff_radius();
    debug_assert!(
        cutoff <= mesh.grid_spacing() * (1.0 + 1.0e-6),
        "cell size smaller than the kernel cutoff"
    );

    let center = mesh.cell_index_from_position(position);
    let all_cells = mesh.all_cells();
    let mut lower = center - arrayi_splat(1);
    let mut upper = center + arrayi_splat(2);
    for k in 0..DIMENSIONS {
        lower[k] = lower[k].max(0);
        upper[k] = upper[k].min(all_cells[k]);
    }

    let mut found = Vec::new();
    for_each_cell(lower, upper, |cell| {
        for &j in cell_list.particles_in_cell(cell) {
            if skip(j) {
                continue;
            }
            let displacement = target_positions[j] - position;
            let r = displacement.magnitude();
            if r < cutoff {
                found.push(Neighbor {
                    index: j,
                    dw_ij: kernel.dw(r).abs(),
                    e_ij: displacement / (r + TINY_REAL),
                });
            }
        }
    });
    found
}

/// Builds the self relation of one body
///
/// `cell_list` must have been updated with `positions`.
pub fn build_inner<P, K>(
    policy: &P,
    cell_list: &CellLinkedList,
    positions: &[Vecd],
    kernel: &K,
) -> NeighborRelation
where
    P: ExecutionPolicy,
    K: SmoothingKernel,
{
    let lists = policy.map(positions.len(), |i| {
        search_cell_block(cell_list, positions, positions[i], kernel, |j| j == i)
    });
    let relation = NeighborRelation::from_lists(lists, kernel.cutoff_radius());
    log::debug!(
        "Inner relation built: {} owners, {} pairs",
        relation.owner_count(),
        relation.total_neighbors()
    );
    relation
}

/// Builds the relation from one body's particles to another body
///
/// `target_cell_list` must have been updated with `target_positions`.
pub fn build_contact<P, K>(
    policy: &P,
    positions: &[Vecd],
    target_cell_list: &CellLinkedList,
    target_positions: &[Vecd],
    kernel: &K,
) -> NeighborRelation
where
    P: ExecutionPolicy,
    K: SmoothingKernel,
{
    let lists = policy.map(positions.len(), |i| {
        search_cell_block(target_cell_list, target_positions, positions[i], kernel, |_| false)
    });
    let relation = NeighborRelation::from_lists(lists, kernel.cutoff_radius());
    log::debug!(
        "Contact relation built: {} owners, {} pairs",
        relation.owner_count(),
        relation.total_neighbors()
    );
    relation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ParallelPolicy, SequencedPolicy};
    use crate::kernel::WendlandC2;
    use crate::math::{vecd_splat, BoundingBox};
    use crate::mesh::Mesh;
    use cgmath::Zero;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cell_list_for(positions: &[Vecd], kernel: &WendlandC2) -> CellLinkedList {
        let mesh = Mesh::new(
            BoundingBox::new(vecd_splat(0.0), vecd_splat(1.0)),
            kernel.cutoff_radius(),
            2,
        );
        let mut list = CellLinkedList::new(mesh);
        list.update(positions);
        list
    }

    fn random_positions(count: usize, seed: u64) -> Vec<Vecd> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let mut p = Vecd::zero();
                for k in 0..DIMENSIONS {
                    p[k] = rng.random_range(0.0..1.0);
                }
                p
            })
            .collect()
    }

    #[test]
    fn test_inner_relation_matches_brute_force() {
        let kernel = WendlandC2::new(0.05);
        let positions = random_positions(300, 7);
        let list = cell_list_for(&positions, &kernel);
        let relation = build_inner(&SequencedPolicy, &list, &positions, &kernel);

        assert_eq!(relation.owner_count(), positions.len());
        for i in 0..positions.len() {
            let mut expected: Vec<usize> = (0..positions.len())
                .filter(|&j| j != i && (positions[j] - positions[i]).magnitude() < kernel.cutoff_radius())
                .collect();
            let mut actual: Vec<usize> = relation.neighbors(i).map(|n| n.index).collect();
            expected.sort_unstable();
            actual.sort_unstable();
            assert_eq!(actual, expected, "owner {}", i);
        }
    }

    #[test]
    fn test_neighbor_entries_are_unit_and_positive() {
        let kernel = WendlandC2::new(0.05);
        let positions = random_positions(200, 11);
        let list = cell_list_for(&positions, &kernel);
        let relation = build_inner(&ParallelPolicy, &list, &positions, &kernel);

        for i in 0..positions.len() {
            for n in relation.neighbors(i) {
                assert!((n.e_ij.magnitude() - 1.0).abs() < 1.0e-4);
                assert!(n.dw_ij >= 0.0);
                let toward = positions[n.index] - positions[i];
                assert!(toward.dot(n.e_ij) > 0.0);
            }
        }
    }

    #[test]
    fn test_parallel_build_matches_sequential() {
        let kernel = WendlandC2::new(0.04);
        let positions = random_positions(500, 3);
        let list = cell_list_for(&positions, &kernel);
        let seq = build_inner(&SequencedPolicy, &list, &positions, &kernel);
        let par = build_inner(&ParallelPolicy, &list, &positions, &kernel);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_cutoff_is_strict() {
        let mut far = Vecd::zero();
        far[0] = 0.5;
        let positions = vec![Vecd::zero(), far];
        let mesh = Mesh::new(BoundingBox::new(vecd_splat(0.0), vecd_splat(1.0)), 0.6, 1);
        let mut list = CellLinkedList::new(mesh);
        list.update(&positions);

        // separation equals the cutoff exactly
        let at_cutoff = WendlandC2::new(0.25);
        let relation = build_inner(&SequencedPolicy, &list, &positions, &at_cutoff);
        assert_eq!(relation.total_neighbors(), 0);

        let beyond = WendlandC2::new(0.2501);
        let relation = build_inner(&SequencedPolicy, &list, &positions, &beyond);
        assert_eq!(relation.total_neighbors(), 2);
    }

    #[test]
    fn test_contact_relation_targets_other_body() {
        let kernel = WendlandC2::new(0.05);
        let fluid = random_positions(50, 5);
        let wall: Vec<Vecd> = (0..40)
            .map(|k| {
                let mut p = Vecd::zero();
                p[0] = k as Real * 0.025;
                p
            })
            .collect();
        let wall_list = cell_list_for(&wall, &kernel);
        let relation = build_contact(&SequencedPolicy, &fluid, &wall_list, &wall, &kernel);

        assert_eq!(relation.owner_count(), fluid.len());
        for i in 0..fluid.len() {
            let expected = wall
                .iter()
                .filter(|w| (**w - fluid[i]).magnitude() < kernel.cutoff_radius())
                .count();
            assert_eq!(relation.neighbors(i).count(), expected);
        }
    }

    #[test]
    fn test_ranges_are_contiguous_and_device_layout() {
        let lists = vec![
            vec![Neighbor { index: 1, dw_ij: 2.0, e_ij: vecd_splat(0.5) }],
            vec![],
            vec![
                Neighbor { index: 0, dw_ij: 1.0, e_ij: vecd_splat(-0.5) },
                Neighbor { index: 1, dw_ij: 3.0, e_ij: vecd_splat(0.1) },
            ],
        ];
        let relation = NeighborRelation::from_lists(lists, 1.0);
        assert_eq!(relation.neighbor_range(0), 0..1);
        assert_eq!(relation.neighbor_range(1), 1..1);
        assert_eq!(relation.neighbor_range(2), 1..3);
        assert_eq!(relation.neighbors(2).nth(1).map(|n| n.dw_ij), Some(3.0));
        assert_eq!(relation.device_topology(), vec![0, 1, 1, 3, 1, 0, 1]);
        assert_eq!(relation.device_kernel_data()[0][3], 2.0);

        let empty = NeighborRelation::empty(4, 1.0);
        assert_eq!(empty.owner_count(), 4);
        assert_eq!(empty.neighbors(3).count(), 0);
    }
}
