use super::link::{Link, Parameter};
use super::loss::{mean_squared_error, Grads, Loss};
use super::Predictor;
use crate::array::Array;
use crate::backend::AccelGate;
use crate::dataset::Inputs;
use crate::error::{Error, Result};
use std::sync::Arc;

const PREFIX: &str = "predictor/";

/// Wraps a predictor with a mean-squared-error loss.
///
/// Accepts `(x, t)` positionally or as `{"x": .., "t": ..}`.
#[derive(Clone, Debug)]
pub struct Regressor<P> {
    pub predictor: P,
}

impl<P: Predictor + Clone + 'static> Regressor<P> {
    pub fn new(predictor: P) -> Self {
        Self { predictor }
    }
}

fn split_inputs(inputs: &Inputs) -> Result<(&Array, &Array)> {
    match inputs {
        Inputs::Positional(v) => match v.as_slice() {
            [x, t] => Ok((x, t)),
            _ => Err(Error::InvalidArgument(format!(
                "regressor expects 2 positional inputs (x, t), got {}",
                v.len()
            ))),
        },
        Inputs::Named(m) => match (m.get("x"), m.get("t")) {
            (Some(x), Some(t)) => Ok((x, t)),
            _ => Err(Error::InvalidArgument(
                "regressor expects named inputs \"x\" and \"t\"".into(),
            )),
        },
        Inputs::Single(_) => Err(Error::InvalidArgument(
            "regressor needs both inputs and targets".into(),
        )),
    }
}

impl<P: Predictor + Clone + 'static> Link for Regressor<P> {
    fn params(&self) -> Vec<(String, &Parameter)> {
        self.predictor
            .params()
            .into_iter()
            .map(|(name, p)| (format!("{}{}", PREFIX, name), p))
            .collect()
    }

    fn params_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        self.predictor
            .params_mut()
            .into_iter()
            .map(|(name, p)| (format!("{}{}", PREFIX, name), p))
            .collect()
    }

    fn clone_link(&self) -> Box<dyn Link> {
        Box::new(self.clone())
    }

    fn forward(&self, inputs: &Inputs) -> Result<Loss> {
        let (x, t) = split_inputs(inputs)?;
        let (y, backward) = self.predictor.predict(x)?;
        let (value, gy) = mean_squared_error(&y, t)?;
        Ok(Loss::new(value, move || {
            let grads = backward(&gy)?;
            Ok(grads
                .into_iter()
                .map(|(name, g)| (format!("{}{}", PREFIX, name), g))
                .collect::<Grads>())
        }))
    }

    fn accel_gate(&self) -> Option<Arc<AccelGate>> {
        self.predictor.accel_gate()
    }

    fn set_accel_gate(&mut self, gate: Arc<AccelGate>) {
        self.predictor.set_accel_gate(gate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;
    use std::collections::BTreeMap;

    fn model() -> Regressor<Linear> {
        Regressor::new(
            Linear::from_params(Array::new(vec![2.0], [1, 1]).unwrap(), Some(Array::zeros(&[1])))
                .unwrap(),
        )
    }

    #[test]
    fn test_param_names() {
        let names: Vec<_> = model().params().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["predictor/W", "predictor/b"]);
    }

    #[test]
    fn test_positional_and_named_agree() {
        let x = Array::new(vec![1.0, 2.0], [2, 1]).unwrap();
        let t = Array::new(vec![1.0, 1.0], [2]).unwrap();

        let positional = model()
            .forward(&Inputs::Positional(vec![x.clone(), t.clone()]))
            .unwrap();
        let mut named = BTreeMap::new();
        named.insert("x".to_string(), x);
        named.insert("t".to_string(), t);
        let named = model().forward(&Inputs::Named(named)).unwrap();

        // y = [2, 4], diff = [1, 3]
        assert_eq!(positional.value(), 5.0);
        assert_eq!(named.value(), 5.0);

        let grads = positional.backward().unwrap();
        // gy = diff, gW = 1*1 + 3*2
        assert_eq!(grads["predictor/W"].data(), &[7.0]);
        assert_eq!(grads["predictor/b"].data(), &[4.0]);
    }

    #[test]
    fn test_single_input_rejected() {
        let err = model().forward(&Inputs::Single(Array::zeros(&[2, 1])));
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }
}
