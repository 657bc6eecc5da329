// src/mesh/mod.rs
//! Background grid and index-box traversal

pub mod grid;
pub mod iterators;

pub use grid::Mesh;
pub use iterators::{
    for_each_cell, mesh_find_if, mesh_find_if_3d, mesh_for_each, mesh_for_each_3d,
    mesh_parallel_for, mesh_parallel_for_3d, MeshRange2, MeshRange3, MESH_BLOCK,
};
