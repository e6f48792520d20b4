use dptrain::array::{Array, Device};
use dptrain::dataset::{Inputs, SerialIterator};
use dptrain::nn::{Grads, Linear, Link, Loss, Parameter, Regressor};
use dptrain::optim::{Optimizer, Sgd};
use dptrain::serializers::{load_state_dict, to_state_dict};
use dptrain::training::{
    ParallelUpdater, ParallelUpdaterBuilder, StandardUpdater, StopTrigger, Trainer, Updater,
};
use dptrain::Error;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// `sum(x @ w^T)`: linear in the inputs, so per-shard gradients add up to the
/// full-batch gradient exactly.
fn dot_loss(link: &dyn Link, inputs: &Inputs) -> dptrain::Result<Loss> {
    let Inputs::Single(x) = inputs else {
        return Err(Error::InvalidArgument("expected a single input".into()));
    };
    let params = link.params();
    let (name, w) = &params[0];
    let d = w.data.size();
    let mut value = 0.0;
    let mut gw = vec![0.0; d];
    for row in x.data().chunks(d) {
        for j in 0..d {
            value += row[j] * w.data.data()[j];
            gw[j] += row[j];
        }
    }
    let g = Array::new(gw, w.data.shape().to_vec())?.into_device(x.device());
    let name = name.clone();
    Ok(Loss::new(value, move || Ok(Grads::from([(name, g)]))))
}

fn vectors(n: usize) -> Vec<Inputs> {
    (0..n)
        .map(|i| Inputs::Single(Array::new(vec![i as f32, 1.0 - i as f32], [2]).unwrap()))
        .collect()
}

fn pairs(n: usize) -> Vec<Inputs> {
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            Inputs::Positional(vec![
                Array::new(vec![x], [1]).unwrap(),
                Array::new(vec![1.0 - x], [1]).unwrap(),
            ])
        })
        .collect()
}

fn sgd_with(model: impl Link + 'static, lr: f32) -> Box<dyn Optimizer> {
    let mut optimizer = Sgd::new(lr);
    optimizer.setup(Box::new(model));
    Box::new(optimizer)
}

fn regressor() -> Regressor<Linear> {
    Regressor::new(
        Linear::from_params(
            Array::new(vec![0.3], [1, 1]).unwrap(),
            Some(Array::new(vec![-0.2], [1]).unwrap()),
        )
        .unwrap(),
    )
}

fn two_devices() -> BTreeMap<String, Device> {
    BTreeMap::from([
        ("main".to_string(), Device::Gpu(0)),
        ("second".to_string(), Device::Gpu(1)),
    ])
}

fn iterator(data: Vec<Inputs>, batch_size: usize) -> Box<SerialIterator> {
    Box::new(SerialIterator::new(data, batch_size, true, false).unwrap())
}

fn flat_params(link: &dyn Link) -> Vec<f32> {
    link.params()
        .into_iter()
        .flat_map(|(_, p)| p.data.data().to_vec())
        .collect()
}

fn main_params(updater: &dyn Updater) -> Vec<f32> {
    flat_params(updater.get_optimizer("main").unwrap().target().unwrap())
}

#[test]
fn test_build_requires_models_or_devices() {
    let result = ParallelUpdater::builder(iterator(pairs(4), 2), sgd_with(regressor(), 0.1)).build();
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    let models: BTreeMap<String, Box<dyn Link>> =
        BTreeMap::from([("main".to_string(), Box::new(regressor()) as Box<dyn Link>)]);
    let result = ParallelUpdater::builder(iterator(pairs(4), 2), sgd_with(regressor(), 0.1))
        .models(models)
        .devices(two_devices())
        .build();
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_build_requires_main_entries() {
    let devices = BTreeMap::from([("second".to_string(), Device::Gpu(1))]);
    let result = ParallelUpdater::builder(iterator(pairs(4), 2), sgd_with(regressor(), 0.1))
        .devices(devices)
        .build();
    assert!(matches!(result, Err(Error::MissingKey(_))));

    let models: BTreeMap<String, Box<dyn Link>> =
        BTreeMap::from([("second".to_string(), Box::new(regressor()) as Box<dyn Link>)]);
    let result = ParallelUpdater::builder(iterator(pairs(4), 2), sgd_with(regressor(), 0.1))
        .models(models)
        .build();
    assert!(matches!(result, Err(Error::MissingKey(_))));

    let result = ParallelUpdaterBuilder::default()
        .iterator("train", iterator(pairs(4), 2))
        .optimizer("main", sgd_with(regressor(), 0.1))
        .devices(two_devices())
        .build();
    assert!(matches!(result, Err(Error::MissingKey(_))));
}

#[test]
fn test_devices_place_models() {
    let updater = ParallelUpdater::builder(iterator(pairs(4), 2), sgd_with(regressor(), 0.1))
        .devices(two_devices())
        .build()
        .unwrap();

    let main = updater.get_optimizer("main").unwrap().target().unwrap();
    assert_eq!(main.device(), Device::Gpu(0));
    assert_eq!(updater.replicas().len(), 1);
    let second = &updater.replicas()["second"];
    assert_eq!(second.device(), Device::Gpu(1));
    assert_eq!(flat_params(second.as_ref()), flat_params(main));
}

#[test]
fn test_summed_gradients_match_single_device() {
    let model = || Linear::from_params(Array::new(vec![0.5, -0.5], [1, 2]).unwrap(), None).unwrap();

    let mut single = StandardUpdater::builder()
        .iterator("main", iterator(vectors(8), 8))
        .optimizer("main", sgd_with(model(), 0.25))
        .loss_fn(dot_loss)
        .build()
        .unwrap();
    let mut parallel = ParallelUpdater::builder(iterator(vectors(8), 8), sgd_with(model(), 0.25))
        .loss_fn(dot_loss)
        .devices(two_devices())
        .build()
        .unwrap();

    for _ in 0..3 {
        single.update().unwrap();
        parallel.update().unwrap();
        assert_eq!(main_params(&parallel), main_params(&single));
    }
    // Each step subtracts 0.25 * sum of the inputs: [28, -20].
    assert_eq!(main_params(&single), vec![0.5 - 21.0, -0.5 + 15.0]);
    assert_eq!(parallel.iteration(), 3);
}

#[test]
fn test_replicas_follow_main_model() {
    let mut updater = ParallelUpdater::builder(iterator(pairs(8), 4), sgd_with(regressor(), 0.1))
        .devices(two_devices())
        .build()
        .unwrap();
    let before = main_params(&updater);

    for _ in 0..4 {
        updater.update().unwrap();
        let main = main_params(&updater);
        assert_eq!(flat_params(updater.replicas()["second"].as_ref()), main);
    }
    assert_ne!(main_params(&updater), before);
    assert_eq!(updater.epoch().unwrap(), 2);
}

#[test]
fn test_models_are_placed_by_name_order() {
    let other = Regressor::new(Linear::from_params(Array::zeros(&[1, 1]), None).unwrap());
    let main = Regressor::new(Linear::from_params(Array::full(&[1, 1], 1.0), None).unwrap());
    let models: BTreeMap<String, Box<dyn Link>> = BTreeMap::from([
        ("main".to_string(), Box::new(main) as Box<dyn Link>),
        ("aux".to_string(), Box::new(other) as Box<dyn Link>),
    ]);

    let mut updater = ParallelUpdater::builder(iterator(pairs(4), 2), Box::new(Sgd::new(0.1)))
        .models(models)
        .build()
        .unwrap();
    assert_eq!(updater.devices()["aux"], Device::Gpu(0));
    assert_eq!(updater.devices()["main"], Device::Gpu(1));
    assert_eq!(main_params(&updater), vec![1.0]);
    assert_eq!(flat_params(updater.replicas()["aux"].as_ref()), vec![1.0]);
    assert_eq!(updater.replicas()["aux"].device(), Device::Gpu(0));

    updater.update().unwrap();
    assert_eq!(
        flat_params(updater.replicas()["aux"].as_ref()),
        main_params(&updater)
    );
}

#[test]
fn test_models_must_match_main() {
    let build = |other: Linear| {
        let models: BTreeMap<String, Box<dyn Link>> = BTreeMap::from([
            (
                "main".to_string(),
                Box::new(Linear::from_params(Array::zeros(&[1, 1]), None).unwrap()) as Box<dyn Link>,
            ),
            ("aux".to_string(), Box::new(other) as Box<dyn Link>),
        ]);
        ParallelUpdater::builder(iterator(vectors(4), 2), Box::new(Sgd::new(0.1)))
            .models(models)
            .build()
    };

    let wider = Linear::from_params(Array::zeros(&[2, 2]), None).unwrap();
    assert!(matches!(build(wider), Err(Error::InvalidArgument(_))));

    let with_bias = Linear::from_params(Array::zeros(&[1, 1]), Some(Array::zeros(&[1]))).unwrap();
    assert!(matches!(build(with_bias), Err(Error::InvalidArgument(_))));

    let same = Linear::from_params(Array::full(&[1, 1], 5.0), None).unwrap();
    assert!(build(same).is_ok());
}

const HEALTHY: u8 = 0;
const FAIL_FORWARD: u8 = 1;
const FAIL_BACKWARD: u8 = 2;

/// The target's own loss, except on `device`, where it fails as `mode` says.
fn failing_on(
    device: Device,
    mode: Arc<AtomicU8>,
) -> impl Fn(&dyn Link, &Inputs) -> dptrain::Result<Loss> + Send + Sync {
    move |link: &dyn Link, inputs: &Inputs| {
        if link.device() != device {
            return link.forward(inputs);
        }
        match mode.load(Ordering::SeqCst) {
            FAIL_FORWARD => Err(Error::InvalidArgument("forward failed".into())),
            FAIL_BACKWARD => {
                let value = link.forward(inputs)?.value();
                Ok(Loss::new(value, || {
                    Err(Error::InvalidArgument("backward failed".into()))
                }))
            }
            _ => link.forward(inputs),
        }
    }
}

#[test]
fn test_replica_failure_leaves_models_untouched() {
    let mode = Arc::new(AtomicU8::new(HEALTHY));
    let mut updater = ParallelUpdater::builder(iterator(pairs(8), 4), sgd_with(regressor(), 0.1))
        .loss_fn(failing_on(Device::Gpu(1), mode.clone()))
        .devices(two_devices())
        .build()
        .unwrap();
    updater.update().unwrap();
    let main_before = main_params(&updater);
    let replica_before = flat_params(updater.replicas()["second"].as_ref());

    for failure in [FAIL_FORWARD, FAIL_BACKWARD] {
        mode.store(failure, Ordering::SeqCst);
        assert!(matches!(updater.update(), Err(Error::InvalidArgument(_))));
        assert_eq!(updater.iteration(), 1);
        assert_eq!(main_params(&updater), main_before);
        assert_eq!(
            flat_params(updater.replicas()["second"].as_ref()),
            replica_before
        );
    }

    mode.store(HEALTHY, Ordering::SeqCst);
    updater.update().unwrap();
    assert_eq!(updater.iteration(), 2);
    assert_ne!(main_params(&updater), main_before);
}

/// A linear layer trained to minimize the mean of its output.
#[derive(Clone, Debug)]
struct MeanOutput(Linear);

impl Link for MeanOutput {
    fn params(&self) -> Vec<(String, &Parameter)> {
        self.0.params()
    }

    fn params_mut(&mut self) -> Vec<(String, &mut Parameter)> {
        self.0.params_mut()
    }

    fn clone_link(&self) -> Box<dyn Link> {
        Box::new(self.clone())
    }

    fn forward(&self, inputs: &Inputs) -> dptrain::Result<Loss> {
        let Inputs::Single(x) = inputs else {
            return Err(Error::InvalidArgument("expected a single input".into()));
        };
        let (y, backward) = self.0.apply(x)?;
        let n = y.size() as f32;
        let gy = y.map(|_| 1.0 / n);
        Ok(Loss::new(y.mean(), move || backward(&gy)))
    }
}

#[test]
fn test_two_devices_batch_of_four() {
    let model = MeanOutput(
        Linear::from_params(
            Array::new(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], [3, 2]).unwrap(),
            Some(Array::zeros(&[3])),
        )
        .unwrap(),
    );
    let before = flat_params(&model);
    let mut updater = ParallelUpdater::builder(iterator(vectors(4), 4), sgd_with(model, 0.1))
        .devices(two_devices())
        .build()
        .unwrap();

    updater.update().unwrap();

    assert_eq!(updater.iteration(), 1);
    let main = main_params(&updater);
    assert_ne!(main, before);
    assert_eq!(flat_params(updater.replicas()["second"].as_ref()), main);
    assert_eq!(updater.replicas()["second"].device(), Device::Gpu(1));
}

#[test]
fn test_batch_smaller_than_device_count_fails() {
    let mut updater = ParallelUpdater::builder(iterator(pairs(4), 1), sgd_with(regressor(), 0.1))
        .devices(two_devices())
        .build()
        .unwrap();
    assert!(matches!(updater.update(), Err(Error::InvalidArgument(_))));
    assert_eq!(updater.iteration(), 0);
}

#[test]
fn test_trainer_observes_every_replica() {
    let updater = ParallelUpdater::builder(iterator(pairs(8), 4), sgd_with(regressor(), 0.1))
        .devices(two_devices())
        .build()
        .unwrap();
    let mut trainer = Trainer::new(updater, StopTrigger::Iteration(2)).unwrap();
    assert!(trainer.reporter().has_observer("main"));
    assert!(trainer.reporter().has_observer("second"));

    trainer.run().unwrap();
    let observation = trainer.reporter().observation();
    assert!(observation.contains_key("main/loss"));
    assert!(observation.contains_key("second/loss"));
}

#[test]
fn test_restoring_resyncs_replicas() {
    let build = || {
        ParallelUpdater::builder(iterator(pairs(8), 4), sgd_with(regressor(), 0.1))
            .devices(two_devices())
            .build()
            .unwrap()
    };
    let mut trained = build();
    for _ in 0..3 {
        trained.update().unwrap();
    }
    let state = to_state_dict(&mut trained).unwrap();

    let mut restored = build();
    load_state_dict(&mut restored, &state, true).unwrap();
    assert_eq!(restored.iteration(), 3);
    assert_eq!(main_params(&restored), main_params(&trained));
    assert_eq!(
        flat_params(restored.replicas()["second"].as_ref()),
        main_params(&trained)
    );
}
