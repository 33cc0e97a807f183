//! Observer callbacks and the global callback-error hook.
//!
//! Callbacks fire during decode. Each invocation is isolated: a failing
//! observer is reported through the hook and decoding continues, so one
//! faulty observer cannot starve the rest of the patch.

use std::error::Error;
use std::rc::Rc;
use std::sync::RwLock;

use log::warn;

use crate::change_tree::DirtyKey;
use crate::value::Value;

pub type CallbackResult = Result<(), Box<dyn Error>>;

/// Container observer: `(value, key)` where key is the list index or map key.
pub type ContainerCallback = Rc<dyn Fn(&Value, &DirtyKey) -> CallbackResult>;

/// Record field listener: `(new value, previous value)`.
pub type ListenCallback = Rc<dyn Fn(Option<&Value>, Option<&Value>) -> CallbackResult>;

/// Hook receiving every callback error. Overridable process-wide.
pub type ErrorHook = fn(&dyn Error);

static ERROR_HOOK: RwLock<Option<ErrorHook>> = RwLock::new(None);

fn default_hook(error: &dyn Error) {
    warn!("observer callback failed: {}", error);
}

/// Replace the global callback-error hook.
pub fn set_error_hook(hook: ErrorHook) {
    if let Ok(mut slot) = ERROR_HOOK.write() {
        *slot = Some(hook);
    }
}

/// Route one callback error to the hook.
pub fn report_callback_error(error: Box<dyn Error>) {
    let hook = ERROR_HOOK
        .read()
        .ok()
        .and_then(|slot| *slot)
        .unwrap_or(default_hook);
    hook(error.as_ref());
}

/// Run a callback and route any error, swallowing it.
pub fn run_callback(result: CallbackResult) {
    if let Err(error) = result {
        report_callback_error(error);
    }
}

/// The `on_add` / `on_change` / `on_remove` trio carried by containers.
#[derive(Default, Clone)]
pub struct ContainerObservers {
    pub on_add: Option<ContainerCallback>,
    pub on_change: Option<ContainerCallback>,
    pub on_remove: Option<ContainerCallback>,
}

impl ContainerObservers {
    pub fn notify_add(&self, value: &Value, key: &DirtyKey) {
        if let Some(callback) = &self.on_add {
            run_callback(callback(value, key));
        }
    }

    pub fn notify_change(&self, value: &Value, key: &DirtyKey) {
        if let Some(callback) = &self.on_change {
            run_callback(callback(value, key));
        }
    }

    pub fn notify_remove(&self, value: &Value, key: &DirtyKey) {
        if let Some(callback) = &self.on_remove {
            run_callback(callback(value, key));
        }
    }
}
