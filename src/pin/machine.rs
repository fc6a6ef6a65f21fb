//! The pin state machine.
//!
//! One instance per request, on its own thread, always a child task of the
//! owning app instance. The only blocking point is the maintain-mode wait on
//! the task's cancellation signal; app-driven pushes travel through
//! [`PinUplink`] without touching this thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Receiver;
use tracing::{debug, warn};

use crate::core::cell::AttrWriter;
use crate::core::TagId;
use crate::error::Error;
use crate::tx::{TxBuilder, TxPool};

use super::host::Host;
use super::request::{PinError, PinRequest, SharedRequester, SyncMode};
use super::task::Task;

/// Lifecycle of one pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinState {
    Unpinned,
    Pinning,
    StatePushed,
    Maintaining,
    Closing,
    Closed,
}

/// App-side push handle for maintain mode.
///
/// Cloned freely into whatever worker the application uses to watch its own
/// data; each `push` assembles a fresh Tx from the shared pool and delivers
/// it through the requester.
#[derive(Clone)]
pub struct PinUplink {
    pool: Arc<TxPool>,
    requester: SharedRequester,
    route_id: TagId,
    task: Arc<Task>,
    max_ops: usize,
    max_data_bytes: usize,
}

impl PinUplink {
    /// Build and deliver one Tx. Fails quietly once the pin is closing.
    pub fn push<F>(&self, fill: F) -> Result<(), PinError>
    where
        F: FnOnce(&mut dyn AttrWriter) -> Result<(), PinError>,
    {
        if self.task.is_closing() {
            return Err(PinError::ShuttingDown);
        }
        let mut builder = TxBuilder::new(&self.pool, self.max_ops, self.max_data_bytes);
        fill(&mut builder)?;
        let tx = builder.finish(self.route_id)?;
        self.requester.push_tx(tx)
    }

    /// The pin's cancellation signal, for app-side select loops.
    pub fn closing(&self) -> Receiver<()> {
        self.task.closing()
    }

    pub fn route_id(&self) -> TagId {
        self.route_id
    }
}

/// Guarantees at most one completion per request.
struct Completion {
    requester: SharedRequester,
    req_id: TagId,
    fired: AtomicBool,
}

impl Completion {
    fn new(requester: SharedRequester, req_id: TagId) -> Self {
        Self {
            requester,
            req_id,
            fired: AtomicBool::new(false),
        }
    }

    fn complete(&self, err: Option<Error>) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        match &err {
            None => debug!(req = %self.req_id, "pin complete"),
            Some(e) if e.quiet() => debug!(req = %self.req_id, reason = %e, "pin closed"),
            Some(e) => warn!(req = %self.req_id, error = %e, "pin failed"),
        }
        self.requester.on_complete(err);
    }
}

fn enter(req: &PinRequest, state: PinState) {
    debug!(req = %req.id, state = ?state, "pin state");
}

/// Drive one request from Unpinned to Closed.
pub(crate) fn run(host: Arc<Host>, req: PinRequest, requester: SharedRequester) {
    let done = Completion::new(Arc::clone(&requester), req.id);
    enter(&req, PinState::Unpinned);

    // Resolution failures short-circuit to Closing without ever pinning.
    let instance = match host.instance_for(&req) {
        Ok(instance) => instance,
        Err(err) => {
            done.complete(Some(err.into()));
            return;
        }
    };
    let task = match instance.start_pin_task(&req) {
        Ok(task) => task,
        Err(err) => {
            done.complete(Some(err.into()));
            return;
        }
    };

    enter(&req, PinState::Pinning);
    let cell = match instance.runtime().pin_cell(None, &req) {
        Ok(cell) => cell,
        Err(err) => {
            enter(&req, PinState::Closing);
            done.complete(Some(err.into()));
            task.close();
            return;
        }
    };

    let limits = host.limits();
    let mut builder = TxBuilder::new(host.pool(), limits.max_ops_per_tx, limits.max_tx_data_bytes);
    let tx = match cell
        .marshal_attrs(&mut builder)
        .and_then(|()| builder.finish(req.id).map_err(PinError::Marshal))
    {
        Ok(tx) => tx,
        Err(err) => {
            enter(&req, PinState::Closing);
            cell.release_pin();
            done.complete(Some(err.into()));
            task.close();
            return;
        }
    };

    if requester.push_tx(tx).is_err() {
        // The transport went away mid-delivery: a normal shutdown reason.
        enter(&req, PinState::Closing);
        cell.release_pin();
        done.complete(Some(PinError::RequestClosed.into()));
        task.close();
        return;
    }
    enter(&req, PinState::StatePushed);

    match req.mode {
        SyncMode::None => {
            enter(&req, PinState::Closing);
            cell.release_pin();
            done.complete(None);
            task.close();
        }
        SyncMode::Maintain => {
            enter(&req, PinState::Maintaining);
            cell.on_maintain(PinUplink {
                pool: Arc::clone(host.pool()),
                requester: Arc::clone(&requester),
                route_id: req.id,
                task: Arc::clone(&task),
                max_ops: limits.max_ops_per_tx,
                max_data_bytes: limits.max_tx_data_bytes,
            });

            // Suspend until the governing task signals closing. No timeout:
            // cancellation policy belongs to the layers above this core.
            let _ = task.closing().recv();

            enter(&req, PinState::Closing);
            cell.release_pin();
            done.complete(Some(PinError::ShuttingDown.into()));
            task.close();
        }
    }
    enter(&req, PinState::Closed);
}
