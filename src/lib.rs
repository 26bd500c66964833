//! # DetCI: Determinant-Based Configuration Interaction
//!
//! DetCI is a library for full configuration interaction calculations over
//! Slater determinants expressed as occupation bitstrings, with the
//! following capabilities:
//! - addressing tables and excitation link tables for determinant strings,
//! - Hamiltonian-vector contractions over one- and two-electron integrals in
//!   dense, four-fold and eight-fold packed storage,
//! - a Davidson subspace eigensolver with a subblock-augmented preconditioner,
//! - spin-resolved and spin-traced reduced density matrices up to fourth order
//!   together with transition density matrices, and
//! - total and partitioned spin expectation values.
//!
//! The drivers in [`solver`] treat the spin-paired sector where the alpha and
//! beta electron counts coincide and the coefficient matrix is symmetric under
//! the string-transpose pairing.
//!
//! ## Getting started
//!
//! To use DetCI in your Rust project, simply add this crate to your project's
//! `Cargo.toml`. A linear algebra backend must be chosen through the features
//! inherited from the
//! [`ndarray-linalg`](https://docs.rs/ndarray-linalg/latest/ndarray_linalg/)
//! crate. One (and only one) of these must be enabled:
//! - `openblas-static`: Downloads, builds OpenBLAS, and links statically
//! - `openblas-system`: Finds and links existing OpenBLAS in the system
//! - `netlib-static`: Downloads, builds LAPACK, and links statically
//! - `netlib-system`: Finds and links existing LAPACK in the system
//! - `intel-mkl-static`: Finds and links existing static Intel MKL in the
//!   system, or downloads and links statically if not found
//! - `intel-mkl-system`: Finds and links existing shared Intel MKL in the
//!   system
//!
//! ## Examples and usage
//!
//! For most items (structs, enums, and functions), their usages are
//! illustrated in test functions. For more explanation, please consult this
//! documentation.
//!
//! ## License
//!
//! GNU Lesser General Public License v3.0.

pub mod cistring;
pub mod contract;
pub mod davidson;
pub mod hamiltonian;
pub mod rdm;
pub mod solver;
pub mod spin_op;

pub use cistring::ElectronCount;
pub use hamiltonian::Eri;
pub use solver::{energy, kernel, FciConfig, FciError, FciResult};
