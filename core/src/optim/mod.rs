//! Optimizers.
//!
//! An optimizer owns its target link. After gradients have been accumulated
//! into the target's parameters, [`Optimizer::update`] applies one step of the
//! update rule to every parameter that has a gradient.

pub mod adamw;
pub mod sgd;

pub use adamw::AdamW;
pub use sgd::Sgd;

use crate::dataset::Inputs;
use crate::error::{Error, Result};
use crate::nn::{Link, LossFn};
use crate::serializers::Serializer;

/// A gradient-based update rule bound to a target link.
pub trait Optimizer: Send {
    /// Binds the optimizer to `target` and prepares per-parameter state.
    fn setup(&mut self, target: Box<dyn Link>);

    /// The link being optimized.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] before [`setup`](Self::setup) has been called.
    fn target(&self) -> Result<&dyn Link>;

    fn target_mut(&mut self) -> Result<&mut dyn Link>;

    /// Number of update steps taken so far.
    fn t(&self) -> u64;

    /// Applies one step using the gradients currently stored in the target.
    fn update(&mut self) -> Result<()>;

    /// Clears gradients, computes `loss_fn` on `inputs`, backpropagates and
    /// applies one step. Returns the loss value.
    ///
    /// Nothing is updated if the loss or its backward pass fails.
    fn update_with(&mut self, loss_fn: &dyn LossFn, inputs: &Inputs) -> Result<f32> {
        let target = self.target_mut()?;
        target.zero_grads();
        let loss = loss_fn.loss(&*target, inputs)?;
        let value = loss.value();
        target.accumulate_grads(loss.backward()?)?;
        self.update()?;
        Ok(value)
    }

    fn serialize(&mut self, serializer: &mut dyn Serializer) -> Result<()>;
}

pub(crate) fn no_target() -> Error {
    Error::NotFound("optimizer target (call `setup` first)".into())
}
