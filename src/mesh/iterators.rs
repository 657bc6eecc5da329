// src/mesh/iterators.rs
//! Traversal primitives over rectangular integer index boxes
//!
//! All boxes are half-open `[lower, upper)`. Sequential traversal is
//! row-major with the last axis varying fastest.

use crate::math::{Array2i, Array3i, Arrayi};
use cgmath::{Vector2, Vector3};
use rayon::prelude::*;

/// Edge length of a block handed to one parallel task
pub const MESH_BLOCK: i32 = 8;

/// Half-open 2-D index box used by the parallel traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange2 {
    pub lower: Array2i,
    pub upper: Array2i,
}

/// Half-open 3-D index box used by the parallel traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange3 {
    pub lower: Array3i,
    pub upper: Array3i,
}

impl MeshRange2 {
    pub fn new(lower: Array2i, upper: Array2i) -> Self {
        Self { lower, upper }
    }
}

impl MeshRange3 {
    pub fn new(lower: Array3i, upper: Array3i) -> Self {
        Self { lower, upper }
    }
}

pub fn mesh_for_each<F>(lower: Array2i, upper: Array2i, mut f: F)
where
    F: FnMut(i32, i32),
{
    for l in lower.x..upper.x {
        for m in lower.y..upper.y {
            f(l, m);
        }
    }
}

pub fn mesh_for_each_3d<F>(lower: Array3i, upper: Array3i, mut f: F)
where
    F: FnMut(i32, i32, i32),
{
    for l in lower.x..upper.x {
        for m in lower.y..upper.y {
            for n in lower.z..upper.z {
                f(l, m, n);
            }
        }
    }
}

/// Returns the first index for which `predicate` holds, or `upper` if none does
pub fn mesh_find_if<F>(lower: Array2i, upper: Array2i, mut predicate: F) -> Array2i
where
    F: FnMut(i32, i32) -> bool,
{
    for l in lower.x..upper.x {
        for m in lower.y..upper.y {
            if predicate(l, m) {
                return Vector2::new(l, m);
            }
        }
    }
    upper
}

/// 3-D version of [`mesh_find_if`], same sentinel convention
pub fn mesh_find_if_3d<F>(lower: Array3i, upper: Array3i, mut predicate: F) -> Array3i
where
    F: FnMut(i32, i32, i32) -> bool,
{
    for l in lower.x..upper.x {
        for m in lower.y..upper.y {
            for n in lower.z..upper.z {
                if predicate(l, m, n) {
                    return Vector3::new(l, m, n);
                }
            }
        }
    }
    upper
}

fn blocks(lower: Array2i, upper: Array2i) -> Vec<(Array2i, Array2i)> {
    let mut out = Vec::new();
    let mut i = lower.x;
    while i < upper.x {
        let i_end = (i + MESH_BLOCK).min(upper.x);
        let mut j = lower.y;
        while j < upper.y {
            let j_end = (j + MESH_BLOCK).min(upper.y);
            out.push((Vector2::new(i, j), Vector2::new(i_end, j_end)));
            j = j_end;
        }
        i = i_end;
    }
    out
}

/// Visits every index of the box on the rayon pool, one task per block
///
/// Ordering across blocks is unspecified. The call returns once every block
/// has finished.
pub fn mesh_parallel_for<F>(range: MeshRange2, f: F)
where
    F: Fn(i32, i32) + Sync + Send,
{
    blocks(range.lower, range.upper)
        .into_par_iter()
        .for_each(|(lower, upper)| mesh_for_each(lower, upper, &f));
}

/// 3-D parallel traversal; the first two axes are blocked, the third is
/// walked inside each block
pub fn mesh_parallel_for_3d<F>(range: MeshRange3, f: F)
where
    F: Fn(i32, i32, i32) + Sync + Send,
{
    let (lower, upper) = (range.lower, range.upper);
    blocks(lower.truncate(), upper.truncate())
        .into_par_iter()
        .for_each(|(block_lower, block_upper)| {
            mesh_for_each_3d(
                block_lower.extend(lower.z),
                block_upper.extend(upper.z),
                &f,
            )
        });
}

/// Dimension-independent sequential traversal over cell indices
pub fn for_each_cell<F>(lower: Arrayi, upper: Arrayi, mut f: F)
where
    F: FnMut(Arrayi),
{
    #[cfg(feature = "dim2")]
    mesh_for_each(lower, upper, |l, m| f(Vector2::new(l, m)));
    #[cfg(feature = "dim3")]
    mesh_for_each_3d(lower, upper, |l, m, n| f(Vector3::new(l, m, n)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_for_each_visits_box_once() {
        let mut seen = Vec::new();
        mesh_for_each(Vector2::new(0, 0), Vector2::new(3, 3), |l, m| {
            seen.push((l, m))
        });
        assert_eq!(seen.len(), 9);
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique.len(), 9);
        assert_eq!(seen[0], (0, 0));
        assert_eq!(seen[1], (0, 1));
        assert_eq!(seen[8], (2, 2));
    }

    #[test]
    fn test_for_each_3d_row_major() {
        let mut seen = Vec::new();
        mesh_for_each_3d(Vector3::new(0, 0, 0), Vector3::new(2, 2, 2), |l, m, n| {
            seen.push((l, m, n))
        });
        assert_eq!(seen.len(), 8);
        assert_eq!(seen[1], (0, 0, 1));
        assert_eq!(seen[2], (0, 1, 0));
    }

    #[test]
    fn test_find_if_sentinel() {
        let upper = Vector2::new(2, 2);
        assert_eq!(mesh_find_if(Vector2::new(0, 0), upper, |_, _| false), upper);

        let upper3 = Vector3::new(2, 2, 2);
        assert_eq!(
            mesh_find_if_3d(Vector3::new(0, 0, 0), upper3, |_, _, _| false),
            upper3
        );
    }

    #[test]
    fn test_find_if_returns_first_match() {
        let found = mesh_find_if(Vector2::new(0, 0), Vector2::new(4, 4), |l, m| l + m == 3);
        assert_eq!(found, Vector2::new(0, 3));

        let mut calls = 0;
        mesh_find_if(Vector2::new(0, 0), Vector2::new(4, 4), |l, m| {
            calls += 1;
            l == 1 && m == 0
        });
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_parallel_for_covers_box() {
        let seen = Mutex::new(Vec::new());
        let range = MeshRange2::new(Vector2::new(-3, 1), Vector2::new(17, 12));
        mesh_parallel_for(range, |l, m| {
            if let Ok(mut guard) = seen.lock() {
                guard.push((l, m));
            }
        });
        let seen = seen.into_inner().unwrap_or_default();
        assert_eq!(seen.len(), 20 * 11);
        let unique: HashSet<_> = seen.into_iter().collect();
        assert_eq!(unique.len(), 20 * 11);
    }

    #[test]
    fn test_parallel_for_3d_covers_box() {
        let seen = Mutex::new(HashSet::new());
        let range = MeshRange3::new(Vector3::new(0, 0, 0), Vector3::new(10, 9, 3));
        mesh_parallel_for_3d(range, |l, m, n| {
            if let Ok(mut guard) = seen.lock() {
                assert!(guard.insert((l, m, n)));
            }
        });
        assert_eq!(seen.into_inner().map(|s| s.len()).unwrap_or(0), 270);
    }

    #[test]
    fn test_empty_box_is_noop() {
        let mut calls = 0;
        mesh_for_each(Vector2::new(2, 2), Vector2::new(2, 5), |_, _| calls += 1);
        assert_eq!(calls, 0);
    }
}
