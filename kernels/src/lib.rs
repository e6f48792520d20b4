//! Native CPU kernels for the accelerated dispatch path of `dptrain`.
//!
//! The orchestration crate only routes work here after its capability gate has
//! accepted the inputs (f32, host memory, supported rank). Every kernel works on
//! flat row-major slices and parallelizes with `rayon`.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_acc_sum;
pub mod cpu_matmul;
pub mod cpu_transpose;

pub use cpu_acc_sum::cpu_acc_sum;
pub use cpu_matmul::{cpu_matmul, cpu_matmul_nt};
pub use cpu_transpose::cpu_transpose;

/// Version of the kernel set. Callers compare against it before relying on
/// kernels that were added in later releases.
pub const VERSION: u32 = 2;

/// Ranks the kernels are laid out for.
pub const SUPPORTED_NDIMS: [usize; 2] = [2, 4];

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Element types the kernels accept.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}
