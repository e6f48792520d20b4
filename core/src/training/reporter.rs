use crate::error::{Error, Result};
use crate::nn::Link;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Summary of a registered observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observer {
    pub name: String,
    /// Number of scalar parameters of the observed link.
    pub num_params: usize,
}

#[derive(Debug, Default)]
struct State {
    observers: BTreeMap<String, Observer>,
    observation: BTreeMap<String, f32>,
}

/// Collects named values reported during training.
///
/// Values are reported on behalf of a registered observer and stored under
/// `"<observer>/<key>"`. Clones share the same underlying state.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    inner: Arc<Mutex<State>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `link` under `name`, replacing any previous registration.
    pub fn add_observer(&self, name: &str, link: &dyn Link) {
        tracing::debug!(observer = name, "observer registered");
        self.lock().observers.insert(
            name.to_string(),
            Observer {
                name: name.to_string(),
                num_params: link.count_params(),
            },
        );
    }

    pub fn has_observer(&self, name: &str) -> bool {
        self.lock().observers.contains_key(name)
    }

    pub fn observers(&self) -> Vec<Observer> {
        self.lock().observers.values().cloned().collect()
    }

    /// Records `value` as `"<observer>/<key>"`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `observer` has not been registered.
    pub fn report(&self, observer: &str, key: &str, value: f32) -> Result<()> {
        let mut state = self.lock();
        if !state.observers.contains_key(observer) {
            return Err(Error::NotFound(format!("observer {:?}", observer)));
        }
        state
            .observation
            .insert(format!("{}/{}", observer, key), value);
        Ok(())
    }

    /// Snapshot of the values reported since the last clear.
    pub fn observation(&self) -> BTreeMap<String, f32> {
        self.lock().observation.clone()
    }

    pub fn clear_observation(&self) {
        self.lock().observation.clear();
    }
}
