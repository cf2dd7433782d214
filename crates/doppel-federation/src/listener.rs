//! Observers of inbound federation traffic.

use std::sync::{Mutex, MutexGuard};

use doppel_rooms::Event;
use doppel_types::Edu;

/// Hooks invoked after the responder has processed inbound traffic.
///
/// `on_pdu` runs only after the event has been appended to its room, so an
/// observer can always fetch what it is handed. Hooks run synchronously on
/// the request's worker; keep them short.
pub trait FederationListener: Send + Sync {
    fn on_invite(&self, _event: &Event) {}
    fn on_pdu(&self, _event: &Event) {}
    fn on_edu(&self, _edu: &Edu) {}
}

/// Logs every hook at debug level and otherwise does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl FederationListener for LoggingListener {
    fn on_invite(&self, event: &Event) {
        tracing::debug!(room_id = event.room_id(), event_id = event.event_id(), "invite received");
    }

    fn on_pdu(&self, event: &Event) {
        tracing::debug!(
            room_id = event.room_id(),
            event_id = event.event_id(),
            event_type = event.event_type(),
            "pdu committed"
        );
    }

    fn on_edu(&self, edu: &Edu) {
        tracing::debug!(edu_type = %edu.edu_type, "edu received");
    }
}

/// Keeps a copy of everything it is handed, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    invites: Mutex<Vec<Event>>,
    pdus: Mutex<Vec<Event>>,
    edus: Mutex<Vec<Edu>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invites(&self) -> Vec<Event> {
        lock(&self.invites).clone()
    }

    pub fn pdus(&self) -> Vec<Event> {
        lock(&self.pdus).clone()
    }

    pub fn edus(&self) -> Vec<Edu> {
        lock(&self.edus).clone()
    }
}

impl FederationListener for RecordingListener {
    fn on_invite(&self, event: &Event) {
        lock(&self.invites).push(event.clone());
    }

    fn on_pdu(&self, event: &Event) {
        lock(&self.pdus).push(event.clone());
    }

    fn on_edu(&self, edu: &Edu) {
        lock(&self.edus).push(edu.clone());
    }
}
