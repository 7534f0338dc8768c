//! Driver callback entry points.
//!
//! Drivers call these `extern "C"` functions from threads they own, passing the
//! handle of the connection as context. Every entry point resolves the owning
//! manager through the process-wide registry, releases the registry, then takes
//! the lock of its own callback kind and runs the handler registered for that
//! kind. Callbacks of different kinds, and of different managers, never wait on
//! each other. Unknown handles are dropped silently: callbacks may still arrive
//! while a manager is being torn down.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use eeg_types::{BatteryInfo, TypedChunk};
use lazy_static::lazy_static;
use log::{debug, error};

use crate::manager::ManagerShared;
use crate::registry::Registry;
use crate::type_table::decode_chunk;
use crate::types::{DriverCallbacks, SessionHandle};

/// Receives every decoded chunk.
pub type ChunkHandler = Box<dyn FnMut(TypedChunk) + Send>;
pub type BatteryHandler = Box<dyn FnMut(BatteryInfo) + Send>;
pub type EventHandler = Box<dyn FnMut() + Send>;
/// Receives `(progress, total)` of a firmware update.
pub type ProgressHandler = Box<dyn FnMut(usize, usize) + Send>;

lazy_static! {
    /// Managers reachable from driver callbacks.
    pub(crate) static ref MANAGERS: Registry<ManagerShared> = Registry::new();
}

/// Handler slots of one manager, one lock per callback kind.
#[derive(Default)]
pub struct Handlers {
    pub(crate) chunk: Mutex<Option<ChunkHandler>>,
    pub(crate) battery: Mutex<Option<BatteryHandler>>,
    pub(crate) disconnect: Mutex<Option<EventHandler>>,
    pub(crate) config_loaded: Mutex<Option<EventHandler>>,
    pub(crate) stream_started: Mutex<Option<EventHandler>>,
    pub(crate) stream_stopped: Mutex<Option<EventHandler>>,
    pub(crate) ota_progress: Mutex<Option<ProgressHandler>>,
    retired: AtomicBool,
}

impl Handlers {
    /// Stops all further dispatch and drops every handler.
    ///
    /// Each slot is cleared under its own lock, so once this returns no
    /// handler is still running. Must not be called from one of these
    /// handlers.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        replace_handler(&self.chunk, None);
        replace_handler(&self.battery, None);
        replace_handler(&self.disconnect, None);
        replace_handler(&self.config_loaded, None);
        replace_handler(&self.stream_started, None);
        replace_handler(&self.stream_stopped, None);
        replace_handler(&self.ota_progress, None);
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

pub(crate) fn lock_slot<H>(slot: &Mutex<Option<H>>) -> MutexGuard<'_, Option<H>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Swaps the handler in `slot` under that slot's lock.
pub(crate) fn replace_handler<H>(slot: &Mutex<Option<H>>, handler: Option<H>) {
    let previous = std::mem::replace(&mut *lock_slot(slot), handler);
    drop(previous);
}

/// The callback table handed to drivers.
pub fn driver_callbacks() -> DriverCallbacks {
    DriverCallbacks {
        chunk: chunk_ready,
        battery: battery_updated,
        disconnect: disconnected,
        config_loaded,
        stream_started,
        stream_stopped,
        ota_progress,
    }
}

/// Runs the handler in `slot` of the manager owning `data`.
///
/// The registry lock is released before the slot lock is taken.
fn dispatch<H>(
    data: *mut c_void,
    slot: fn(&Handlers) -> &Mutex<Option<H>>,
    run: impl FnOnce(&ManagerShared, &mut H),
) {
    let Some(mgr) = MANAGERS.lookup(SessionHandle::from_ptr(data)) else {
        return;
    };
    let mut guard = lock_slot(slot(&mgr.handlers));
    if mgr.handlers.is_retired() {
        debug!("Callback for retired manager dropped");
        return;
    }
    if let Some(handler) = guard.as_mut() {
        run(&mgr, handler);
    }
}

fn dispatch_event(data: *mut c_void, slot: fn(&Handlers) -> &Mutex<Option<EventHandler>>) {
    dispatch(data, slot, |_, handler: &mut EventHandler| handler());
}

/// Chunk-ready entry point.
///
/// The channel layout is queried from the driver on every call, and the
/// buffers are decoded into owned arrays before this returns.
///
/// # Safety
/// `chunk` must point to one buffer pointer per channel of the driver's
/// current layout, each valid for `chunk_size` elements, for the duration of
/// the call.
pub unsafe extern "C" fn chunk_ready(chunk: *const *const c_void, chunk_size: usize, data: *mut c_void) {
    let handle = SessionHandle::from_ptr(data);
    dispatch(data, |h| &h.chunk, |mgr: &ManagerShared, handler: &mut ChunkHandler| {
        let tags = mgr.driver.stream_channel_types();
        let buffers: &[*const c_void] = if tags.is_empty() {
            &[]
        } else if chunk.is_null() {
            error!("Chunk for {:?} has no channel buffers, dropped", handle);
            return;
        } else {
            std::slice::from_raw_parts(chunk, tags.len())
        };

        match decode_chunk(&tags, buffers, chunk_size) {
            Ok(decoded) => handler(decoded),
            Err(e) => error!("Dropping chunk for {:?}: {}", handle, e),
        }
    });
}

/// # Safety
/// `info` must be null or point to a valid [`BatteryInfo`] for the call.
pub unsafe extern "C" fn battery_updated(info: *const BatteryInfo, data: *mut c_void) {
    let Some(info) = info.as_ref().copied() else {
        return;
    };
    dispatch(data, |h| &h.battery, |_, handler: &mut BatteryHandler| handler(info));
}

/// # Safety
/// Safe for any `data`; unsafe only to match the driver ABI.
pub unsafe extern "C" fn disconnected(data: *mut c_void) {
    dispatch_event(data, |h| &h.disconnect);
}

/// # Safety
/// Safe for any `data`; unsafe only to match the driver ABI.
pub unsafe extern "C" fn config_loaded(data: *mut c_void) {
    dispatch_event(data, |h| &h.config_loaded);
}

/// # Safety
/// Safe for any `data`; unsafe only to match the driver ABI.
pub unsafe extern "C" fn stream_started(data: *mut c_void) {
    dispatch_event(data, |h| &h.stream_started);
}

/// # Safety
/// Safe for any `data`; unsafe only to match the driver ABI.
pub unsafe extern "C" fn stream_stopped(data: *mut c_void) {
    dispatch_event(data, |h| &h.stream_stopped);
}

/// # Safety
/// Safe for any `data`; unsafe only to match the driver ABI.
pub unsafe extern "C" fn ota_progress(data: *mut c_void, progress: usize, total: usize) {
    dispatch(data, |h| &h.ota_progress, |_, handler: &mut ProgressHandler| {
        handler(progress, total)
    });
}
