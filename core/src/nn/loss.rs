//! Losses and deferred gradients.
//!
//! A forward pass returns a [`Loss`]: the scalar value plus a one-shot closure
//! that produces the gradient of every parameter that contributed to it. The
//! closure owns whatever intermediate arrays it needs, so forward passes of
//! different replicas can run concurrently and be differentiated later.

use super::link::Link;
use crate::array::Array;
use crate::dataset::Inputs;
use crate::error::Result;
use std::collections::BTreeMap;
use std::fmt;

/// Gradients keyed by parameter name.
pub type Grads = BTreeMap<String, Array>;

/// Maps an output gradient to parameter gradients.
pub type Backward = Box<dyn FnOnce(&Array) -> Result<Grads> + Send>;

pub struct Loss {
    value: f32,
    backward: Box<dyn FnOnce() -> Result<Grads> + Send>,
}

impl fmt::Debug for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loss").field("value", &self.value).finish()
    }
}

impl Loss {
    pub fn new(value: f32, backward: impl FnOnce() -> Result<Grads> + Send + 'static) -> Self {
        Self {
            value,
            backward: Box::new(backward),
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Consumes the loss and returns the parameter gradients.
    pub fn backward(self) -> Result<Grads> {
        (self.backward)()
    }
}

/// Computes a loss of `link` on converted inputs.
pub trait LossFn: Send + Sync {
    fn loss(&self, link: &dyn Link, inputs: &Inputs) -> Result<Loss>;
}

impl<F> LossFn for F
where
    F: Fn(&dyn Link, &Inputs) -> Result<Loss> + Send + Sync,
{
    fn loss(&self, link: &dyn Link, inputs: &Inputs) -> Result<Loss> {
        self(link, inputs)
    }
}

/// Uses the link's own [`Link::forward`] as the loss.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetLoss;

impl LossFn for TargetLoss {
    fn loss(&self, link: &dyn Link, inputs: &Inputs) -> Result<Loss> {
        link.forward(inputs)
    }
}

/// Mean squared error between `y` and `t` with its gradient with respect to `y`.
///
/// `t` may have any shape with as many elements as `y`.
pub fn mean_squared_error(y: &Array, t: &Array) -> Result<(f32, Array)> {
    let t = t.clone().reshape(y.shape().to_vec())?;
    let diff = y.zip_map(&t, |a, b| a - b)?;
    let n = diff.size().max(1) as f32;
    let value = diff.data().iter().map(|d| d * d).sum::<f32>() / n;
    let grad = diff.map(|d| 2.0 * d / n);
    Ok((value, grad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Device;
    use crate::error::Error;

    #[test]
    fn test_mean_squared_error() {
        let y = Array::new(vec![1.0, 2.0], [2, 1]).unwrap();
        let t = Array::new(vec![0.0, 4.0], [2]).unwrap();
        let (value, grad) = mean_squared_error(&y, &t).unwrap();
        assert_eq!(value, 2.5);
        assert_eq!(grad.shape(), &[2, 1]);
        assert_eq!(grad.data(), &[1.0, -2.0]);
    }

    #[test]
    fn test_mean_squared_error_device_mismatch() {
        let y = Array::new(vec![1.0], [1]).unwrap();
        let t = Array::new(vec![1.0], [1]).unwrap().to_device(Device::Gpu(0));
        assert!(matches!(
            mean_squared_error(&y, &t),
            Err(Error::DeviceMismatch { .. })
        ));
    }

    #[test]
    fn test_loss_backward_runs_once() {
        let loss = Loss::new(1.5, || Ok(Grads::new()));
        assert_eq!(loss.value(), 1.5);
        assert!(loss.backward().unwrap().is_empty());
    }
}
