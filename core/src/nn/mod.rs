//! Links, parameters and losses.
//!
//! The autodiff engine is kept at arm's length: a [`Link`] produces a [`Loss`]
//! whose backward closure returns named gradients, and the link accumulates
//! them into its [`Parameter`]s. Everything the training loop needs
//! (zeroing, summing gradients across replicas, copying parameters, moving
//! between devices) is defined on the `Link` trait.

pub mod linear;
pub mod link;
pub mod loss;
pub mod regressor;

pub use linear::{Linear, LinearOptions};
pub use link::{Link, Parameter};
pub use loss::{mean_squared_error, Backward, Grads, Loss, LossFn, TargetLoss};
pub use regressor::Regressor;

use crate::array::Array;
use crate::error::Result;

/// A link that maps an input batch to an output, with a backward pass.
pub trait Predictor: Link {
    fn predict(&self, x: &Array) -> Result<(Array, Backward)>;
}
