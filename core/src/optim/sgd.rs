use super::{no_target, Optimizer};
use crate::error::Result;
use crate::nn::Link;
use crate::serializers::{Serializer, SerializerExt};

/// Stochastic Gradient Descent (SGD) optimizer.
///
/// Updates parameters using the rule:
/// `param = param - lr * grad`
#[derive(Debug)]
pub struct Sgd {
    pub lr: f32,
    target: Option<Box<dyn Link>>,
    t: u64,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            target: None,
            t: 0,
        }
    }
}

impl Optimizer for Sgd {
    fn setup(&mut self, target: Box<dyn Link>) {
        self.target = Some(target);
        self.t = 0;
    }

    fn target(&self) -> Result<&dyn Link> {
        self.target.as_deref().ok_or_else(no_target)
    }

    fn target_mut(&mut self) -> Result<&mut dyn Link> {
        match self.target.as_mut() {
            Some(target) => Ok(target.as_mut()),
            None => Err(no_target()),
        }
    }

    fn t(&self) -> u64 {
        self.t
    }

    fn update(&mut self) -> Result<()> {
        let lr = self.lr;
        for (_, p) in self.target_mut()?.params_mut() {
            if let Some(g) = &p.grad {
                p.data.axpy(-lr, g)?;
            }
        }
        self.t += 1;
        Ok(())
    }

    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        s.value("t", &mut self.t)
    }
}
