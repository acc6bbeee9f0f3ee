//! Correlation table for outstanding join requests.
//!
//! Each worker process keeps one [`PendingRequestTable`]. A request gets the
//! smallest id not currently in use, and the entry lives until the matching
//! response resolves it.
//!
//! ```text
//!   allocate ──► Pending ──resolve──► (removed, continuation runs)
//!                   │
//!                timeout
//!                   ▼
//!               Abandoned ──late response──► (removed, handle closed)
//!                   │
//!                 grace
//!                   ▼
//!               (removed)
//! ```
//!
//! Abandoned ids stay reserved so a late response can never be matched to a
//! newer request that happened to reuse the id. [`forget`](PendingRequestTable::forget)
//! releases one once the owner stops waiting for its late response.

use std::collections::BTreeMap;

use crate::error::ProtocolError;
use crate::key::ListenParams;
use crate::message::MapId;

/// One outstanding request.
pub struct PendingRequest<C> {
    /// Correlation id sent to the coordinator.
    pub map_id: MapId,
    /// Parameters the response will be merged with.
    pub params: ListenParams,
    /// Continuation to resume once the outcome is known.
    pub callback: C,
    serial: u64,
}

impl<C> PendingRequest<C> {
    /// Allocation serial, distinguishing reuses of the same id.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

enum Slot<C> {
    Pending(PendingRequest<C>),
    Abandoned { serial: u64 },
}

/// Result of matching a response against the table.
pub enum Resolved<C> {
    /// The request was still waiting.
    Pending(PendingRequest<C>),
    /// The request had timed out; the response arrived late.
    Abandoned(MapId),
}

/// Maps correlation ids to outstanding requests.
pub struct PendingRequestTable<C> {
    entries: BTreeMap<MapId, Slot<C>>,
    next_serial: u64,
}

impl<C> Default for PendingRequestTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PendingRequestTable<C> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_serial: 0,
        }
    }

    /// Store a request under the smallest unused id and return that id.
    ///
    /// Linear in the number of outstanding requests, which stays small:
    /// it is bounded by listeners being set up, not by traffic.
    pub fn allocate(&mut self, params: ListenParams, callback: C) -> MapId {
        let mut candidate = 0u32;
        for id in self.entries.keys() {
            if id.0 != candidate {
                break;
            }
            candidate += 1;
        }
        let map_id = MapId(candidate);

        let serial = self.next_serial;
        self.next_serial += 1;

        self.entries.insert(
            map_id,
            Slot::Pending(PendingRequest {
                map_id,
                params,
                callback,
                serial,
            }),
        );
        map_id
    }

    /// Remove and return the entry a response refers to.
    ///
    /// # Errors
    ///
    /// `ProtocolError::UnknownCorrelationId` if this process has no entry
    /// for `map_id`.
    pub fn resolve(&mut self, map_id: MapId) -> Result<Resolved<C>, ProtocolError> {
        match self.entries.remove(&map_id) {
            Some(Slot::Pending(request)) => Ok(Resolved::Pending(request)),
            Some(Slot::Abandoned { .. }) => Ok(Resolved::Abandoned(map_id)),
            None => Err(ProtocolError::UnknownCorrelationId(map_id)),
        }
    }

    /// Look at a pending entry without removing it.
    pub fn get(&self, map_id: MapId) -> Option<&PendingRequest<C>> {
        match self.entries.get(&map_id) {
            Some(Slot::Pending(request)) => Some(request),
            _ => None,
        }
    }

    /// Erase a pending entry, returning it.
    pub fn remove(&mut self, map_id: MapId) -> Option<PendingRequest<C>> {
        match self.entries.remove(&map_id)? {
            Slot::Pending(request) => Some(request),
            abandoned @ Slot::Abandoned { .. } => {
                self.entries.insert(map_id, abandoned);
                None
            }
        }
    }

    /// Give up on a request whose response is overdue.
    ///
    /// Only acts if `map_id` still holds the allocation identified by
    /// `serial`; the id stays reserved until the late response shows up.
    pub fn abandon(&mut self, map_id: MapId, serial: u64) -> Option<PendingRequest<C>> {
        let current = matches!(
            self.entries.get(&map_id),
            Some(Slot::Pending(request)) if request.serial == serial
        );
        if !current {
            return None;
        }
        match self.entries.insert(map_id, Slot::Abandoned { serial }) {
            Some(Slot::Pending(request)) => Some(request),
            _ => None,
        }
    }

    /// Release an abandoned id whose late response is no longer expected.
    ///
    /// Only acts if `map_id` is still the abandoned allocation `serial`.
    /// Returns whether the id was released.
    pub fn forget(&mut self, map_id: MapId, serial: u64) -> bool {
        let abandoned = matches!(
            self.entries.get(&map_id),
            Some(Slot::Abandoned { serial: s }) if *s == serial
        );
        if abandoned {
            self.entries.remove(&map_id);
        }
        abandoned
    }

    /// Whether `map_id` is reserved, pending or abandoned.
    pub fn contains(&self, map_id: MapId) -> bool {
        self.entries.contains_key(&map_id)
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }

    /// Number of ids held by timed-out requests.
    pub fn abandoned_count(&self) -> usize {
        self.entries.len() - self.pending_count()
    }

    /// Whether no id is reserved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
