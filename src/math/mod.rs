//! Math support: quaternions, first-order filters and a small linear solver

pub mod filter;
pub mod linalg;
pub mod quaternion;
