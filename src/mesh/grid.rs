// src/mesh/grid.rs
//! Background lattice used to bucket particles
//!
//! A `Mesh` partitions a bounding region into cells of one interaction radius.
//! It is built once per body during setup and never resized: particles that
//! leave the region are clamped into the boundary cells rather than growing
//! the lattice.

use crate::error::{SphError, SphResult};
use crate::math::{arrayi_splat, vecd_splat, Arrayi, BoundingBox, Real, Vecd, DIMENSIONS};
use cgmath::Zero;

/// Regular lattice of cells and grid points
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    lower_bound: Vecd,
    grid_spacing: Real,
    buffer_width: usize,
    all_grid_points: Arrayi,
    all_cells: Arrayi,
}

impl Mesh {
    /// Creates a mesh around a tentative box widened by `buffer_width` cells
    ///
    /// # Arguments
    /// * `tentative_bounds` - Region the body is expected to occupy
    /// * `grid_spacing` - Cell size, normally the kernel cutoff radius
    /// * `buffer_width` - Number of extra cells added on every side
    pub fn new(tentative_bounds: BoundingBox, grid_spacing: Real, buffer_width: usize) -> Self {
        debug_assert!(grid_spacing > 0.0, "grid spacing must be positive");

        let mesh_buffer = vecd_splat(buffer_width as Real * grid_spacing);
        let lower_bound = tentative_bounds.lower - mesh_buffer;
        let tentative_dimension = tentative_bounds.upper + mesh_buffer - lower_bound;

        let mut all_grid_points = Arrayi::zero();
        for k in 0..DIMENSIONS {
            all_grid_points[k] = (tentative_dimension[k] / grid_spacing).ceil() as i32 + 1;
        }

        Self {
            lower_bound,
            grid_spacing,
            buffer_width,
            all_grid_points,
            all_cells: all_grid_points - arrayi_splat(1),
        }
    }

    /// Recreates a mesh from stored lattice parameters
    ///
    /// Fails unless every axis has at least two grid points, i.e. one cell.
    pub fn from_grid(
        lower_bound: Vecd,
        grid_spacing: Real,
        all_grid_points: Arrayi,
    ) -> SphResult<Self> {
        if grid_spacing.is_nan() || grid_spacing <= 0.0 {
            return Err(SphError::config(format!(
                "grid spacing must be positive, got {grid_spacing}"
            )));
        }
        for k in 0..DIMENSIONS {
            if all_grid_points[k] < 2 {
                return Err(SphError::config(format!(
                    "axis {k} needs at least 2 grid points, got {}",
                    all_grid_points[k]
                )));
            }
        }

        Ok(Self {
            lower_bound,
            grid_spacing,
            buffer_width: 0,
            all_grid_points,
            all_cells: all_grid_points - arrayi_splat(1),
        })
    }

    pub fn lower_bound(&self) -> Vecd {
        self.lower_bound
    }

    pub fn grid_spacing(&self) -> Real {
        self.grid_spacing
    }

    pub fn buffer_width(&self) -> usize {
        self.buffer_width
    }

    pub fn all_grid_points(&self) -> Arrayi {
        self.all_grid_points
    }

    pub fn all_cells(&self) -> Arrayi {
        self.all_cells
    }

    /// Region covered by the cells, buffer included
    pub fn bounds(&self) -> BoundingBox {
        let mut upper = self.lower_bound;
        for k in 0..DIMENSIONS {
            upper[k] += self.all_cells[k] as Real * self.grid_spacing;
        }
        BoundingBox::new(self.lower_bound, upper)
    }

    /// Total number of cells in the lattice
    pub fn total_cells(&self) -> usize {
        (0..DIMENSIONS)
            .map(|k| self.all_cells[k].max(0) as usize)
            .product()
    }

    /// Cell containing `position`, clamped into the lattice
    pub fn cell_index_from_position(&self, position: Vecd) -> Arrayi {
        let mut index = Arrayi::zero();
        for k in 0..DIMENSIONS {
            let raw = ((position[k] - self.lower_bound[k]) / self.grid_spacing).floor() as i32;
            index[k] = raw.max(0).min(self.all_grid_points[k] - 2);
        }
        index
    }

    pub fn cell_lower_corner(&self, cell_index: Arrayi) -> Vecd {
        let mut corner = self.lower_bound;
        for k in 0..DIMENSIONS {
            corner[k] += cell_index[k] as Real * self.grid_spacing;
        }
        corner
    }

    /// Center of a cell
    pub fn cell_position_from_index(&self, cell_index: Arrayi) -> Vecd {
        self.cell_lower_corner(cell_index) + vecd_splat(0.5 * self.grid_spacing)
    }

    pub fn grid_position_from_index(&self, grid_index: Arrayi) -> Vecd {
        let mut position = self.lower_bound;
        for k in 0..DIMENSIONS {
            position[k] += grid_index[k] as Real * self.grid_spacing;
        }
        position
    }

    /// Row-major linear index of a cell (axis 0 varies slowest)
    pub fn linear_cell_index(&self, cell_index: Arrayi) -> usize {
        let mut linear = 0usize;
        for k in 0..DIMENSIONS {
            linear = linear * self.all_cells[k] as usize + cell_index[k] as usize;
        }
        linear
    }

    /// Inverse of [`Mesh::linear_cell_index`]
    pub fn cell_index_from_linear(&self, mut linear: usize) -> Arrayi {
        let mut index = Arrayi::zero();
        for k in (0..DIMENSIONS).rev() {
            let extent = self.all_cells[k] as usize;
            index[k] = (linear % extent) as i32;
            linear /= extent;
        }
        index
    }

    /// Spreads the low 10 bits of `i` so that two zero bits separate each one
    pub fn morton_code(i: usize) -> usize {
        let mut x = i;
        x &= 0x3ff;
        x = (x | x << 16) & 0x30000ff;
        x = (x | x << 8) & 0x300f00f;
        x = (x | x << 4) & 0x30c30c3;
        x = (x | x << 2) & 0x9249249;
        x
    }

    /// Interleaved Morton key of a whole cell
    pub fn morton_key(cell_index: Arrayi) -> usize {
        (0..DIMENSIONS).fold(0, |key, k| {
            key | Self::morton_code(cell_index[k].max(0) as usize) << k
        })
    }

    /// All cells of the lattice in Morton order
    pub fn morton_cell_order(&self) -> Vec<Arrayi> {
        let mut cells: Vec<Arrayi> = (0..self.total_cells())
            .map(|linear| self.cell_index_from_linear(linear))
            .collect();
        cells.sort_by_key(|cell| Self::morton_key(*cell));
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn unit_mesh() -> Mesh {
        Mesh::new(
            BoundingBox::new(vecd_splat(0.0), vecd_splat(1.0)),
            0.1,
            2,
        )
    }

    #[test]
    fn test_mesh_construction_from_bounds() {
        let mesh = unit_mesh();
        for k in 0..DIMENSIONS {
            assert!((mesh.lower_bound()[k] + 0.2).abs() < 1e-6);
            // extent 1.4 over spacing 0.1 plus the closing grid point
            assert_eq!(mesh.all_grid_points()[k], 15);
            assert_eq!(mesh.all_cells()[k], 14);
        }
        assert_eq!(mesh.buffer_width(), 2);
    }

    #[test]
    fn test_cell_index_round_trip() {
        let mesh = unit_mesh();
        let samples = [0.0, 0.05, 0.37, 0.5, 0.99, 1.1];
        for &s in &samples {
            let p = vecd_splat(s);
            let cell = mesh.cell_index_from_position(p);
            let center = mesh.cell_position_from_index(cell);
            assert_eq!(mesh.cell_index_from_position(center), cell);
        }
    }

    #[test]
    fn test_cell_index_clamping() {
        let mesh = unit_mesh();
        let far_low = mesh.cell_index_from_position(vecd_splat(-100.0));
        let far_high = mesh.cell_index_from_position(vecd_splat(100.0));
        for k in 0..DIMENSIONS {
            assert_eq!(far_low[k], 0);
            assert_eq!(far_high[k], mesh.all_grid_points()[k] - 2);
        }
    }

    #[test]
    fn test_grid_point_and_corner_positions() {
        let mesh = Mesh::from_grid(vecd_splat(-1.0), 0.5, arrayi_splat(5))
            .unwrap_or_else(|e| panic!("{e}"));
        let idx = arrayi_splat(2);
        assert_eq!(mesh.grid_position_from_index(idx), vecd_splat(0.0));
        assert_eq!(mesh.cell_lower_corner(idx), vecd_splat(0.0));
        assert_eq!(mesh.cell_position_from_index(idx), vecd_splat(0.25));
        assert_eq!(mesh.buffer_width(), 0);
    }

    #[test]
    fn test_degenerate_grid_rejected() {
        assert!(Mesh::from_grid(vecd_splat(0.0), 1.0, arrayi_splat(1)).is_err());
        assert!(Mesh::from_grid(vecd_splat(0.0), 1.0, arrayi_splat(0)).is_err());
        let mut thin = arrayi_splat(4);
        thin[DIMENSIONS - 1] = 1;
        assert!(matches!(
            Mesh::from_grid(vecd_splat(0.0), 1.0, thin),
            Err(SphError::InvalidConfig(_))
        ));
        assert!(Mesh::from_grid(vecd_splat(0.0), 0.0, arrayi_splat(4)).is_err());
        assert!(Mesh::from_grid(vecd_splat(0.0), Real::NAN, arrayi_splat(4)).is_err());

        // the smallest valid lattice is a single cell
        let single = Mesh::from_grid(vecd_splat(0.0), 1.0, arrayi_splat(2))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(single.total_cells(), 1);
        assert_eq!(single.cell_index_from_position(vecd_splat(7.0)), arrayi_splat(0));
        assert_eq!(single.cell_index_from_linear(0), arrayi_splat(0));
        assert_eq!(single.linear_cell_index(arrayi_splat(0)), 0);
    }

    #[test]
    fn test_bounds_cover_buffer_cells() {
        let mesh = unit_mesh();
        let bounds = mesh.bounds();
        for k in 0..DIMENSIONS {
            assert!((bounds.lower[k] + 0.2).abs() < 1e-6);
            assert!((bounds.upper[k] - 1.2).abs() < 1e-5);
        }
        assert!(bounds.contains(vecd_splat(1.0)));
        assert!(!bounds.contains(vecd_splat(1.5)));
    }

    #[test]
    fn test_linear_index_round_trip() {
        let mesh = unit_mesh();
        for linear in [0, 1, 13, 14, 100, mesh.total_cells() - 1] {
            let cell = mesh.cell_index_from_linear(linear);
            assert_eq!(mesh.linear_cell_index(cell), linear);
        }
    }

    #[test]
    fn test_morton_code_is_injective() {
        assert_eq!(Mesh::morton_code(0), 0);
        assert_eq!(Mesh::morton_code(1), 1);
        assert_eq!(Mesh::morton_code(2), 8);
        assert_eq!(Mesh::morton_code(3), 9);

        let codes: HashSet<usize> = (0..1024).map(Mesh::morton_code).collect();
        assert_eq!(codes.len(), 1024);
    }

    #[test]
    fn test_morton_cell_order_covers_all_cells() {
        let mesh = Mesh::from_grid(vecd_splat(0.0), 1.0, arrayi_splat(5))
            .unwrap_or_else(|e| panic!("{e}"));
        let order = mesh.morton_cell_order();
        assert_eq!(order.len(), mesh.total_cells());
        assert_eq!(order[0], arrayi_splat(0));
        let keys: Vec<usize> = order.iter().map(|c| Mesh::morton_key(*c)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }
}
