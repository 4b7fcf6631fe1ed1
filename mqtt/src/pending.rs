//! Correlation of issued requests with broker packet ids.
//!
//! The transport assigns packet ids when it writes a packet, not when the
//! request is queued. Requests are queued in order and written in the same
//! order, so the oldest unbound entry belongs to the next packet id the
//! transport reports.

use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
pub(crate) struct PendingAcks<T> {
    unbound: VecDeque<T>,
    inflight: HashMap<u16, T>,
}

impl<T> Default for PendingAcks<T> {
    fn default() -> Self {
        Self {
            unbound: VecDeque::new(),
            inflight: HashMap::new(),
        }
    }
}

impl<T> PendingAcks<T> {
    /// Queue an entry for a request about to be handed to the transport.
    pub(crate) fn push(&mut self, entry: T) {
        self.unbound.push_back(entry);
    }

    /// Take back the most recent entry after the transport rejected it.
    pub(crate) fn rollback(&mut self) -> Option<T> {
        self.unbound.pop_back()
    }

    /// The transport wrote the next queued request with `pkid`.
    ///
    /// Returns false when nothing was waiting for a packet id.
    pub(crate) fn bind(&mut self, pkid: u16) -> bool {
        match self.unbound.pop_front() {
            Some(entry) => {
                self.inflight.insert(pkid, entry);
                true
            }
            None => false,
        }
    }

    /// The broker acknowledged `pkid`.
    pub(crate) fn complete(&mut self, pkid: u16) -> Option<T> {
        self.inflight.remove(&pkid)
    }

    /// Remove everything, bound or not.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut entries: Vec<T> = self.unbound.drain(..).collect();
        entries.extend(self.inflight.drain().map(|(_, entry)| entry));
        entries
    }

    pub(crate) fn len(&self) -> usize {
        self.unbound.len() + self.inflight.len()
    }
}
