// src/relation/cell_list.rs
//! Particle buckets over the background mesh

use crate::math::{Arrayi, Vecd};
use crate::mesh::Mesh;

/// Particles bucketed per mesh cell, stored as compressed rows
#[derive(Debug, Clone)]
pub struct CellLinkedList {
    mesh: Mesh,
    cell_offsets: Vec<usize>,
    cell_particles: Vec<usize>,
}

impl CellLinkedList {
    pub fn new(mesh: Mesh) -> Self {
        let cells = mesh.total_cells();
        Self {
            mesh,
            cell_offsets: vec![0; cells + 1],
            cell_particles: Vec::new(),
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Rebuilds the buckets with a counting sort, keeping index order per cell
    pub fn update(&mut self, positions: &[Vecd]) {
        let cells = self.mesh.total_cells();
        let particle_cells: Vec<usize> = positions
            .iter()
            .map(|p| self.mesh.linear_cell_index(self.mesh.cell_index_from_position(*p)))
            .collect();

        self.cell_offsets.clear();
        self.cell_offsets.resize(cells + 1, 0);
        for &cell in &particle_cells {
            self.cell_offsets[cell + 1] += 1;
        }
        for c in 0..cells {
            self.cell_offsets[c + 1] += self.cell_offsets[c];
        }

        let mut cursor = self.cell_offsets.clone();
        self.cell_particles.clear();
        self.cell_particles.resize(positions.len(), 0);
        for (i, &cell) in particle_cells.iter().enumerate() {
            self.cell_particles[cursor[cell]] = i;
            cursor[cell] += 1;
        }

        log::debug!(
            "Cell list updated: {} particles in {} cells",
            positions.len(),
            cells
        );
    }

    pub fn particles_in_cell(&self, cell: Arrayi) -> &[usize] {
        let linear = self.mesh.linear_cell_index(cell);
        &self.cell_particles[self.cell_offsets[linear]..self.cell_offsets[linear + 1]]
    }

    pub fn particle_count(&self) -> usize {
        self.cell_particles.len()
    }

    /// Particle indices ordered by the Morton key of their cell
    pub fn morton_sequence(&self) -> Vec<usize> {
        self.mesh
            .morton_cell_order()
            .into_iter()
            .flat_map(|cell| self.particles_in_cell(cell).iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{arrayi_splat, vecd_splat};

    fn list_with(positions: &[Vecd]) -> CellLinkedList {
        let mesh = Mesh::from_grid(vecd_splat(0.0), 1.0, arrayi_splat(5))
            .unwrap_or_else(|e| panic!("{e}"));
        let mut list = CellLinkedList::new(mesh);
        list.update(positions);
        list
    }

    #[test]
    fn test_particles_are_bucketed() {
        let positions = vec![
            vecd_splat(0.5),
            vecd_splat(2.5),
            vecd_splat(0.2),
            vecd_splat(-7.0),
        ];
        let list = list_with(&positions);
        assert_eq!(list.particle_count(), 4);
        assert_eq!(list.particles_in_cell(arrayi_splat(0)), &[0, 2, 3]);
        assert_eq!(list.particles_in_cell(arrayi_splat(2)), &[1]);
        assert!(list.particles_in_cell(arrayi_splat(3)).is_empty());
    }

    #[test]
    fn test_morton_sequence_is_permutation() {
        let positions: Vec<Vecd> = (0..16).map(|i| vecd_splat(i as f32 * 0.25)).collect();
        let list = list_with(&positions);
        let mut sequence = list.morton_sequence();
        assert_eq!(sequence.len(), 16);
        assert_eq!(sequence[0], 0);
        sequence.sort_unstable();
        assert_eq!(sequence, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_update_replaces_previous_buckets() {
        let mut list = list_with(&[vecd_splat(0.5)]);
        list.update(&[vecd_splat(3.5), vecd_splat(3.6)]);
        assert!(list.particles_in_cell(arrayi_splat(0)).is_empty());
        assert_eq!(list.particles_in_cell(arrayi_splat(3)), &[0, 1]);
    }
}
