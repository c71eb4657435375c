//! Cancellation hand-off between an executing thread and a cancelling one.
//!
//! The executing thread arms the slot with the connection it is about to
//! block on and disarms it when the driver call returns. A cancelling thread
//! flags the slot and force-closes the armed connection, which makes the
//! blocked driver call fail. The executing thread then learns from the flag
//! that the failure was a cancellation.

use crate::driver::RawConnection;
use crate::error::DriverResult;
use crate::sync::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct CancelSlot {
    pending: AtomicBool,
    active: Mutex<Option<Arc<dyn RawConnection>>>,
}

impl CancelSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark `conn` as running a blocking call.
    pub(crate) fn arm(&self, conn: Arc<dyn RawConnection>) {
        let mut active = lock(&self.active);
        self.pending.store(false, Ordering::SeqCst);
        *active = Some(conn);
    }

    /// Clear the slot. Returns whether a cancel arrived while it was armed,
    /// consuming the flag.
    pub(crate) fn disarm(&self) -> bool {
        let mut active = lock(&self.active);
        *active = None;
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_armed(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Force-close the armed connection. Returns false if nothing was running.
    pub(crate) fn cancel(&self) -> DriverResult<bool> {
        let conn = {
            let active = lock(&self.active);
            let Some(conn) = active.as_ref() else {
                return Ok(false);
            };
            self.pending.store(true, Ordering::SeqCst);
            Arc::clone(conn)
        };
        // Closing may take a while; never hold the slot across it.
        conn.close()?;
        Ok(true)
    }
}
