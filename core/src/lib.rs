//! # dptrain
//!
//! `dptrain` is the training-orchestration layer of a deep-learning framework:
//! it drives the optimize loop, splits work across devices for synchronous
//! data-parallel training, and routes array operations to an accelerated CPU
//! backend when a capability gate allows it.
//!
//! ## Modules
//!
//! - [`array`]: device-tagged arrays.
//! - [`backend`]: the accelerated-backend capability gate and operation dispatch.
//! - [`dataset`]: datasets, iterators and batch converters.
//! - [`nn`]: links, parameters and losses.
//! - [`optim`]: optimizers.
//! - [`training`]: updaters, the reporter and the trainer.
//! - [`serializers`]: key-path serialization and checkpoints.
//! - [`config`] / [`logging`]: process configuration and `tracing` setup.
//!
//! ## Example
//!
//! ```rust
//! use dptrain::array::{Array, Device};
//! use dptrain::dataset::{Inputs, SerialIterator};
//! use dptrain::nn::{Linear, Regressor};
//! use dptrain::optim::{Optimizer, Sgd};
//! use dptrain::training::{ParallelUpdater, StopTrigger, Trainer, Updater};
//! use std::collections::BTreeMap;
//!
//! let data: Vec<Inputs> = (0..8)
//!     .map(|i| {
//!         let x = i as f32 / 8.0;
//!         Inputs::Positional(vec![Array::new(vec![x], [1]).unwrap(), Array::scalar(3.0 * x)])
//!     })
//!     .collect();
//! let iterator = SerialIterator::new(data, 4, true, false).unwrap();
//!
//! let mut optimizer = Sgd::new(0.1);
//! optimizer.setup(Box::new(Regressor::new(
//!     Linear::from_params(Array::zeros(&[1, 1]), None).unwrap(),
//! )));
//!
//! let mut devices = BTreeMap::new();
//! devices.insert("main".to_string(), Device::Gpu(0));
//! devices.insert("second".to_string(), Device::Gpu(1));
//!
//! let updater = ParallelUpdater::builder(Box::new(iterator), Box::new(optimizer))
//!     .devices(devices)
//!     .build()
//!     .unwrap();
//!
//! let mut trainer = Trainer::new(updater, StopTrigger::Epoch(2)).unwrap();
//! trainer.run().unwrap();
//! assert_eq!(trainer.updater().iteration(), 4);
//! ```

pub mod array;
pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod nn;
pub mod optim;
pub mod serializers;
pub mod training;

pub use error::{Error, Result};
