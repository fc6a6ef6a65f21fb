//! Host session: the root that owns app instances and their pins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::core::cell::AppRuntime;
use crate::core::{AppDef, Limits, Registry, TagId};

use super::machine;
use super::request::{PinError, PinRequest, PinTarget, SharedRequester};
use super::task::Task;
use crate::tx::TxPool;

/// One application's live runtime within a session.
///
/// Its task is a child of the session task and idle-closes once the last pin
/// leaves, so unused apps release their resources without an explicit call.
pub struct AppInstance {
    def: Arc<AppDef>,
    runtime: Arc<dyn AppRuntime>,
    task: Arc<Task>,
    max_pins: usize,
}

impl AppInstance {
    pub fn def(&self) -> &Arc<AppDef> {
        &self.def
    }

    pub fn runtime(&self) -> &Arc<dyn AppRuntime> {
        &self.runtime
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub(crate) fn start_pin_task(&self, req: &PinRequest) -> Result<Arc<Task>, PinError> {
        if self.task.child_count() >= self.max_pins {
            return Err(PinError::PinFailed {
                reason: format!("app `{}` is at its pin limit", self.def.spec),
            });
        }
        Ok(self.task.start_child(format!("pin:{}", req.id))?)
    }
}

/// Session-scoped root of the protocol core.
///
/// The registry and the Tx pool are the only state shared across active
/// pins; both are internally synchronized.
pub struct Host {
    registry: Arc<Registry>,
    pool: Arc<TxPool>,
    limits: Limits,
    session: Arc<Task>,
    apps: Mutex<HashMap<TagId, Arc<AppInstance>>>,
}

impl Host {
    pub fn new(registry: Arc<Registry>, limits: Limits) -> Arc<Host> {
        let pool = TxPool::new(&limits);
        Arc::new(Host {
            registry,
            pool,
            limits,
            session: Task::new_root("session"),
            apps: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn session(&self) -> &Arc<Task> {
        &self.session
    }

    /// Start the state machine for one request. All outcomes, including
    /// resolution failures, arrive through the requester's completion hook.
    pub fn pin(self: &Arc<Self>, req: PinRequest, requester: SharedRequester) {
        let host = Arc::clone(self);
        std::thread::spawn(move || machine::run(host, req, requester));
    }

    /// Close the session: cancels every app instance and every pin beneath.
    pub fn close(&self) {
        self.session.close();
    }

    /// Resolve the owning app and return its live instance, creating one if
    /// needed (or if the previous instance already idle-closed).
    pub(crate) fn instance_for(
        self: &Arc<Self>,
        req: &PinRequest,
    ) -> Result<Arc<AppInstance>, PinError> {
        let def = match &req.target {
            PinTarget::Cell(id) => {
                self.registry
                    .app_by_tag(id)
                    .ok_or_else(|| PinError::CellNotFound {
                        target: req.target.to_string(),
                    })?
            }
            PinTarget::Literal(s) => self.registry.app_for_invocation(s)?,
            PinTarget::Url(u) => {
                let invocation = u
                    .split([':', '/'])
                    .find(|t| !t.is_empty())
                    .unwrap_or_default();
                self.registry.app_for_invocation(invocation)?
            }
        };

        let mut apps = self.apps.lock().expect("host apps lock");
        if let Some(instance) = apps.get(&def.spec.id()) {
            if !instance.task().is_closing() {
                return Ok(Arc::clone(instance));
            }
            // The previous instance idle-closed; replace it.
            apps.remove(&def.spec.id());
        }

        let task = self.session.start_child(def.spec.canonic().to_string())?;
        task.set_idle_close(Duration::from_millis(self.limits.idle_close_ms));
        debug!(app = %def.spec, "app instance started");
        let instance = Arc::new(AppInstance {
            runtime: (def.factory)(),
            task,
            max_pins: self.limits.max_pins_per_app,
            def,
        });
        apps.insert(instance.def.spec.id(), Arc::clone(&instance));
        Ok(instance)
    }
}
