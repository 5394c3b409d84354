pub mod sparse_jacobian;
pub mod sparsity;

pub use sparse_jacobian::SparseJacobian;
pub use sparsity::{SparsityPattern, StepLayout};
