use super::link::{Link, Parameter};
use super::loss::{Backward, Grads};
use super::Predictor;
use crate::array::{Array, Device, Layout};
use crate::backend::{dispatch, AccelGate};
use crate::error::{Error, Result};
use rand::Rng;
use std::f32::consts::PI;
use std::sync::Arc;

/// Initialization options for [`Linear`].
#[derive(Clone, Debug)]
pub struct LinearOptions {
    /// Scale of the Gaussian weight initialization.
    pub wscale: f32,
    /// Constant initial bias.
    pub bias: f32,
    /// Build the layer without a bias vector.
    pub nobias: bool,
    /// Explicit `[out, in]` weight, overriding the random initialization.
    pub initial_w: Option<Array>,
    /// Explicit `[out]` bias, overriding `bias`.
    pub initial_bias: Option<Array>,
}

impl Default for LinearOptions {
    fn default() -> Self {
        Self {
            wscale: 1.0,
            bias: 0.0,
            nobias: false,
            initial_w: None,
            initial_bias: None,
        }
    }
}

/// Fully connected layer `y = x @ W^T + b`.
///
/// `W` has shape `[out_size, in_size]` and is initialized from a zero-mean
/// Gaussian with standard deviation `wscale * sqrt(1 / in_size)`.
#[derive(Clone, Debug)]
pub struct Linear {
    pub w: Parameter,
    pub b: Option<Parameter>,
    gate: Option<Arc<AccelGate>>,
}

fn gaussian<R: Rng + ?Sized>(rng: &mut R, std: f32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|_| {
            // Box-Muller; 1 - u keeps the log argument in (0, 1].
            let u1 = 1.0 - rng.random::<f32>();
            let u2 = rng.random::<f32>();
            std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
        })
        .collect()
}

impl Linear {
    /// Creates a layer with default options.
    pub fn new<R: Rng + ?Sized>(in_size: usize, out_size: usize, rng: &mut R) -> Self {
        let std = (1.0 / in_size.max(1) as f32).sqrt();
        let w = Array::from_parts(
            gaussian(rng, std, in_size * out_size),
            vec![out_size, in_size],
            Device::Cpu,
            Layout::Generic,
        );
        Self {
            w: Parameter::new(w),
            b: Some(Parameter::new(Array::zeros(&[out_size]))),
            gate: None,
        }
    }

    /// Creates a layer with explicit options.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if an initial array has the wrong shape.
    pub fn with_options<R: Rng + ?Sized>(
        in_size: usize,
        out_size: usize,
        options: LinearOptions,
        rng: &mut R,
    ) -> Result<Self> {
        let w = match options.initial_w {
            Some(w) => w,
            None => {
                let std = options.wscale * (1.0 / in_size.max(1) as f32).sqrt();
                Array::new(gaussian(rng, std, in_size * out_size), [out_size, in_size])?
            }
        };
        let b = if options.nobias {
            None
        } else {
            Some(
                options
                    .initial_bias
                    .unwrap_or_else(|| Array::full(&[out_size], options.bias)),
            )
        };
        let layer = Self::from_params(w, b)?;
        if layer.in_size() != in_size || layer.out_size() != out_size {
            return Err(Error::ShapeMismatch {
                expected: vec![out_size, in_size],
                got: layer.w.data.shape().to_vec(),
            });
        }
        Ok(layer)
    }

    /// Wraps existing arrays. `w` must be `[out, in]` and `b` `[out]`.
    pub fn from_params(w: Array, b: Option<Array>) -> Result<Self> {
        let &[out_size, _] = w.shape() else {
            return Err(Error::ShapeMismatch {
                expected: vec![0, 0],
                got: w.shape().to_vec(),
            });
        };
        if let Some(b) = &b {
            if b.shape() != [out_size] {
                return Err(Error::ShapeMismatch {
                    expected: vec![out_size],
                    got: b.shape().to_vec(),
                });
            }
        }
        Ok(Self {
            w: Parameter::new(w),
            b: b.map(Parameter::new),
            gate: None,
        })
    }

    pub fn with_gate(mut self, gate: Arc<AccelGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn in_size(&self) -> usize {
        self.w.data.shape()[1]
    }

    pub fn out_size(&self) -> usize {
        self.w.data.shape()[0]
    }

    /// Applies the layer to a `[batch, in]` input.
    pub fn apply(&self, x: &Array) -> Result<(Array, Backward)> {
        let gate = self.gate.clone();
        let y = dispatch::linear(
            x,
            &self.w.data,
            self.b.as_ref().map(|b| &b.data),
            gate.as_deref(),
        )?;

        let x = x.clone();
        let has_bias = self.b.is_some();
        let backward: Backward = Box::new(move |gy: &Array| {
            let mut grads = Grads::new();
            grads.insert("W".into(), dispatch::linear_grad_w(gy, &x, gate.as_deref())?);
            if has_bias {
                grads.insert("b".into(), dispatch::linear_grad_b(gy)?);
            }
            Ok(grads)
        });
        Ok((y, backward))
    }
}

impl Link for Linear {
    fn params(&self) -> Vec<(String, &Parameter)> {
        let mut params = vec![("W".to_string(), &self.w)];
        if let Some(b) = &self.b {
            params.push(("b".to_string(), b));
        }
        params
    }

    fn params_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        let mut params = vec![("W".to_string(), &mut self.w)];
        if let Some(b) = self.b.as_mut() {
            params.push(("b".to_string(), b));
        }
        params
    }

    fn clone_link(&self) -> Box<dyn Link> {
        Box::new(self.clone())
    }

    fn accel_gate(&self) -> Option<Arc<AccelGate>> {
        self.gate.clone()
    }

    fn set_accel_gate(&mut self, gate: Arc<AccelGate>) {
        self.gate = Some(gate);
    }
}

impl Predictor for Linear {
    fn predict(&self, x: &Array) -> Result<(Array, Backward)> {
        self.apply(x)
    }
}
