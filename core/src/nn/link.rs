use super::loss::{Grads, Loss};
use crate::array::{Array, Device, Layout};
use crate::backend::{dispatch, supported_ndims, AccelGate};
use crate::dataset::Inputs;
use crate::error::{Error, Result};
use crate::serializers::{Serializer, SerializerExt};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// A trainable array with its accumulated gradient.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub data: Array,
    pub grad: Option<Array>,
}

impl Parameter {
    pub fn new(data: Array) -> Self {
        Self { data, grad: None }
    }

    /// Sets the gradient to zeros, allocating it if needed.
    pub fn zero_grad(&mut self) {
        match self.grad.as_mut() {
            Some(g) => g.fill(0.0),
            None => self.grad = Some(self.data.zeros_like().with_layout(Layout::Generic)),
        }
    }

    pub fn clear_grad(&mut self) {
        self.grad = None;
    }

    /// Adds `g` to the gradient. `g` must live on the parameter's device.
    pub fn accumulate(&mut self, g: &Array, gate: Option<&AccelGate>) -> Result<()> {
        if g.device() != self.data.device() {
            return Err(Error::DeviceMismatch {
                expected: self.data.device(),
                got: g.device(),
            });
        }
        if g.shape() != self.data.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.data.shape().to_vec(),
                got: g.shape().to_vec(),
            });
        }
        match self.grad.as_mut() {
            Some(dst) => dispatch::acc_add(dst, g, gate),
            None => {
                self.grad = Some(g.clone());
                Ok(())
            }
        }
    }

    pub fn size(&self) -> usize {
        self.data.size()
    }
}

/// A trainable component: a named set of parameters and, optionally, a loss.
///
/// Parameter names are slash-delimited paths (`"W"`, `"predictor/b"`), which
/// double as serialization keys.
pub trait Link: Debug + Send + Sync {
    fn params(&self) -> Vec<(String, &Parameter)>;

    fn params_mut(&mut self) -> Vec<(String, &mut Parameter)>;

    /// Deep copy with independent parameters.
    fn clone_link(&self) -> Box<dyn Link>;

    /// Computes the training loss for `inputs`.
    fn forward(&self, _inputs: &Inputs) -> Result<Loss> {
        Err(Error::NotImplemented(format!(
            "{:?} does not define a training loss",
            self
        )))
    }

    /// Gate used for this link's operations.
    fn accel_gate(&self) -> Option<Arc<AccelGate>> {
        None
    }

    fn set_accel_gate(&mut self, _gate: Arc<AccelGate>) {}

    /// Device of the first parameter, or the host for a link without any.
    fn device(&self) -> Device {
        self.params()
            .first()
            .map(|(_, p)| p.data.device())
            .unwrap_or_default()
    }

    fn zero_grads(&mut self) {
        for (_, p) in self.params_mut() {
            p.zero_grad();
        }
    }

    fn cleargrads(&mut self) {
        for (_, p) in self.params_mut() {
            p.clear_grad();
        }
    }

    /// Adds a set of named gradients into the parameters.
    fn accumulate_grads(&mut self, grads: Grads) -> Result<()> {
        let gate = self.accel_gate();
        let mut params: BTreeMap<String, &mut Parameter> = self.params_mut().into_iter().collect();
        for (name, g) in grads {
            let p = params
                .get_mut(&name)
                .ok_or_else(|| Error::NotFound(format!("parameter {:?}", name)))?;
            p.accumulate(&g, gate.as_deref())?;
        }
        Ok(())
    }

    /// Adds the gradients of `src` (a structurally identical link, possibly on
    /// another device) into this link's gradients.
    fn add_grads(&mut self, src: &dyn Link) -> Result<()> {
        let gate = self.accel_gate();
        let src_params: BTreeMap<String, &Parameter> = src.params().into_iter().collect();
        for (name, dst) in self.params_mut() {
            let s = src_params
                .get(&name)
                .ok_or_else(|| Error::NotFound(format!("parameter {:?} in source link", name)))?;
            if let Some(g) = &s.grad {
                let g = g.to_device(dst.data.device());
                dst.accumulate(&g, gate.as_deref())?;
            }
        }
        Ok(())
    }

    /// Overwrites every parameter with the value of the same-named parameter
    /// of `src`, transferring across devices.
    fn copy_params(&mut self, src: &dyn Link) -> Result<()> {
        let src_params: BTreeMap<String, &Parameter> = src.params().into_iter().collect();
        for (name, dst) in self.params_mut() {
            let s = src_params
                .get(&name)
                .ok_or_else(|| Error::NotFound(format!("parameter {:?} in source link", name)))?;
            let value = s.data.to_device(dst.data.device());
            dst.data.copy_from(&value)?;
        }
        Ok(())
    }

    /// Moves every parameter and gradient onto `device`.
    fn to_device(&mut self, device: Device) {
        for (_, p) in self.params_mut() {
            p.data = p.data.to_device(device);
            if let Some(g) = p.grad.take() {
                p.grad = Some(g.into_device(device));
            }
        }
    }

    /// Routes this link through `gate` and, when the native backend is
    /// present, converts host parameters of supported rank to native layout.
    fn to_accel(&mut self, gate: Arc<AccelGate>) {
        let convert = gate.is_available();
        self.set_accel_gate(gate);
        if !convert {
            return;
        }
        for (_, p) in self.params_mut() {
            if supported_ndims().contains(&p.data.ndim()) {
                p.data = p.data.clone().with_layout(Layout::Native);
            }
        }
    }

    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        for (name, p) in self.params_mut() {
            s.value(&name, &mut p.data)?;
        }
        Ok(())
    }

    /// Total number of scalar parameters.
    fn count_params(&self) -> usize {
        self.params().iter().map(|(_, p)| p.size()).sum()
    }
}

impl Clone for Box<dyn Link> {
    fn clone(&self) -> Self {
        self.clone_link()
    }
}

impl<'a> crate::serializers::Serializable for dyn Link + 'a {
    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        Link::serialize(self, s)
    }
}
