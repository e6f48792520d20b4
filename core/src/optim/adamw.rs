use super::{no_target, Optimizer};
use crate::array::Array;
use crate::error::{Error, Result};
use crate::nn::Link;
use crate::serializers::{Serializer, SerializerExt};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// AdamW optimizer.
///
/// Implements Adam algorithm with Weight Decay fix as described in [Decoupled Weight Decay Regularization](https://arxiv.org/abs/1711.05101).
///
/// # Formula
///
/// $$
/// \begin{aligned}
/// & m_t = \beta_1 m_{t-1} + (1 - \beta_1) g_t \\
/// & v_t = \beta_2 v_{t-1} + (1 - \beta_2) g_t^2 \\
/// & \hat{m}_t = m_t / (1 - \beta_1^t) \\
/// & \hat{v}_t = v_t / (1 - \beta_2^t) \\
/// & \theta_t = \theta_{t-1} - \eta (\hat{m}_t / (\sqrt{\hat{v}_t} + \epsilon) + \lambda \theta_{t-1})
/// \end{aligned}
/// $$
///
/// The step count `t` is shared by all parameters. The moment estimates are
/// kept per parameter name and serialized as `<name>/m` and `<name>/v`.
#[derive(Debug)]
pub struct AdamW {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    target: Option<Box<dyn Link>>,
    /// Parameter name -> (m, v)
    state: BTreeMap<String, (Array, Array)>,
    t: u64,
}

impl AdamW {
    /// Creates a new AdamW optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The learning rate ($\eta$).
    ///
    /// The remaining hyperparameters default to `beta1 = 0.9`, `beta2 = 0.999`,
    /// `epsilon = 1e-8` and `weight_decay = 0.01`.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
            target: None,
            state: BTreeMap::new(),
            t: 0,
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    fn init_state(&mut self) {
        self.state.clear();
        if let Some(target) = &self.target {
            for (name, p) in target.params() {
                let zeros = p.data.zeros_like();
                self.state.insert(name, (zeros.clone(), zeros));
            }
        }
    }
}

impl Optimizer for AdamW {
    fn setup(&mut self, target: Box<dyn Link>) {
        self.target = Some(target);
        self.t = 0;
        self.init_state();
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
        let target = match self.target.as_mut() {
            Some(target) => target,
            None => return Err(no_target()),
        };
        let t = self.t + 1;

        let lr = self.learning_rate;
        let b1 = self.beta1;
        let b2 = self.beta2;
        let eps = self.epsilon;
        let lambda = self.weight_decay;

        // Bias correction terms, computed in f64 and narrowed once.
        let exp = i32::try_from(t).unwrap_or(i32::MAX);
        let bias_correction1 = (1.0 - f64::from(b1).powi(exp)) as f32;
        let bias_correction2 = (1.0 - f64::from(b2).powi(exp)) as f32;

        for (name, p) in target.params_mut() {
            let Some(grad) = &p.grad else {
                continue;
            };
            if grad.shape() != p.data.shape() {
                return Err(Error::ShapeMismatch {
                    expected: p.data.shape().to_vec(),
                    got: grad.shape().to_vec(),
                });
            }
            let (m, v) = self
                .state
                .entry(name)
                .or_insert_with(|| (p.data.zeros_like(), p.data.zeros_like()));

            p.data
                .data_mut()
                .par_iter_mut()
                .zip(grad.data().par_iter())
                .zip(m.data_mut().par_iter_mut())
                .zip(v.data_mut().par_iter_mut())
                .for_each(|(((p, &g), m_elem), v_elem)| {
                    *m_elem = b1 * *m_elem + (1.0 - b1) * g;
                    *v_elem = b2 * *v_elem + (1.0 - b2) * g * g;

                    let m_hat = *m_elem / bias_correction1;
                    let v_hat = *v_elem / bias_correction2;

                    *p -= lr * (m_hat / (v_hat.sqrt() + eps) + lambda * *p);
                });
        }

        self.t = t;
        Ok(())
    }

    fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
        s.value("t", &mut self.t)?;
        for (name, (m, v)) in self.state.iter_mut() {
            let mut child = s.child(name);
            child.value("m", m)?;
            child.value("v", v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;
    use crate::serializers::{load_state_dict, DictionarySerializer, StateDict};

    fn single_weight(value: f32) -> Box<dyn Link> {
        Box::new(Linear::from_params(Array::new(vec![value], [1, 1]).unwrap(), None).unwrap())
    }

    fn set_grad(opt: &mut AdamW, g: f32) {
        let target = opt.target_mut().unwrap();
        for (_, p) in target.params_mut() {
            p.grad = Some(Array::new(vec![g], [1, 1]).unwrap());
        }
    }

    #[test]
    fn test_adamw_new() {
        let adam = AdamW::new(0.001);
        assert_eq!(adam.learning_rate, 0.001);
        assert_eq!(adam.beta1, 0.9);
        assert_eq!(adam.weight_decay, 0.01);
    }

    #[test]
    fn test_adamw_update() {
        let mut adam = AdamW::new(0.1).with_weight_decay(0.0); // Disable WD for simple check
        adam.setup(single_weight(1.0));
        set_grad(&mut adam, 0.1);

        adam.update().unwrap();

        // m_hat = 0.1, v_hat = 0.01, p = 1.0 - 0.1 * (0.1 / 0.1) = 0.9
        let p = adam.target().unwrap().params()[0].1.data.data()[0];
        assert!((p - 0.9).abs() < 1e-5, "Step 1 failed: p={}", p);
        assert_eq!(adam.t(), 1);
    }

    #[test]
    fn test_state_round_trip() {
        struct Opt<'a>(&'a mut AdamW);
        impl crate::serializers::Serializable for Opt<'_> {
            fn serialize(&mut self, s: &mut dyn Serializer) -> Result<()> {
                self.0.serialize(s)
            }
        }

        let mut adam = AdamW::new(0.01);
        adam.setup(single_weight(1.0));
        set_grad(&mut adam, 0.5);
        adam.update().unwrap();
        adam.update().unwrap();

        let mut state = StateDict::new();
        adam.serialize(&mut DictionarySerializer::new(&mut state)).unwrap();
        assert!(state.contains_key("W/m"));
        assert!(state.contains_key("W/v"));

        let mut restored = AdamW::new(0.01);
        restored.setup(single_weight(1.0));
        load_state_dict(&mut Opt(&mut restored), &state, true).unwrap();
        assert_eq!(restored.t(), 2);
        assert_eq!(restored.state, adam.state);
    }
}
