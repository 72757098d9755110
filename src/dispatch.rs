//! Message dispatcher
//!
//! Decodes each inbound frame and fans it out to every listener registered
//! when delivery starts. A panicking listener is caught and logged; the
//! remaining listeners still receive the event.

use crate::core::{parse_frame, InboundEvent};
use crate::registry::SubscriberRegistry;
use crate::stats::LinkStats;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

pub struct Dispatcher {
    registry: Arc<SubscriberRegistry>,
    stats: Arc<LinkStats>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriberRegistry>, stats: Arc<LinkStats>) -> Self {
        Self { registry, stats }
    }

    /// Decode and deliver one text frame
    ///
    /// Returns the number of listeners that handled the event without
    /// panicking; undecodable frames deliver to nobody.
    pub fn dispatch_frame(&self, frame: &str) -> usize {
        self.stats.record_frame();
        match parse_frame(frame) {
            Some(event) => self.deliver(&event),
            None => {
                self.stats.record_dropped();
                0
            }
        }
    }

    pub fn deliver(&self, event: &InboundEvent) -> usize {
        let listeners = self.registry.snapshot();
        trace!(event_type = %event.kind, listeners = listeners.len(), "Dispatching event");

        let mut delivered = 0;
        for (idx, listener) in listeners.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    self.stats.record_subscriber_failure();
                    error!(
                        listener = idx,
                        event_type = %event.kind,
                        panic = panic_message(payload.as_ref()),
                        "Listener panicked during dispatch"
                    );
                }
            }
        }

        self.stats.record_event();
        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
