//! Processing-unit ring and its status machine.
//!
//! The ring is a fixed-capacity sequence of reusable [`ProcessingUnit`]s,
//! indexed by unit number modulo capacity. Each unit cycles through three
//! states:
//!
//! ```text
//! ReadyToInsert ──producer fills payload──▶ ReadyToFormat
//!       ▲                                        │
//!       │                              worker fills buffer
//!       │                                        ▼
//!       └────collector drains buffer──── ReadyToRead
//! ```
//!
//! The status field is the cross-thread handoff: exactly one actor class may
//! touch a unit's payload/buffer in each state, so the inner mutex is
//! uncontended by protocol and only exists to express the ownership transfer
//! in safe Rust. Status loads/stores are sequentially consistent.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::chunk::Chunk;

/// Upper bound on ring capacity regardless of thread budget.
pub const MAX_RING_CAPACITY: usize = 1024;

/// Lifecycle state of one processing unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitStatus {
    /// Vacant; the producer may claim it.
    ReadyToInsert = 0,
    /// Payload written; a worker owns it.
    ReadyToFormat = 1,
    /// Buffer formatted; the collector may drain it.
    ReadyToRead = 2,
}

impl UnitStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => UnitStatus::ReadyToInsert,
            1 => UnitStatus::ReadyToFormat,
            _ => UnitStatus::ReadyToRead,
        }
    }
}

/// What the worker and collector must do with a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitKind {
    /// Stream preamble; first-or-absent.
    Prefix,
    /// One ordered chunk of body rows.
    #[default]
    Body,
    /// Stream postamble.
    BodyFinish,
    /// Out-of-band totals rows.
    Totals,
    /// Out-of-band extremes rows.
    Extremes,
    /// Teardown sentinel; never reaches a formatter.
    Finalize,
}

/// Mutable contents of a processing unit, owned by exactly one actor at a
/// time according to the status machine.
#[derive(Debug, Default)]
pub struct UnitState {
    /// What to do with this unit.
    pub kind: UnitKind,
    /// The unformatted payload, present from submission until a worker
    /// consumes it.
    pub chunk: Chunk,
    /// The formatted bytes; reused across cycles so steady-state formatting
    /// allocates nothing.
    pub buffer: Vec<u8>,
    /// Zero-based index of the payload's first row within the whole stream.
    pub first_row: u64,
    /// Row count of the payload, merged into statistics by the collector.
    pub rows: u64,
}

/// One reusable buffer-plus-metadata cell of the ring.
#[derive(Debug, Default)]
pub struct ProcessingUnit {
    status: AtomicU8,
    /// Payload and buffer; see the module docs for the ownership protocol.
    pub state: Mutex<UnitState>,
}

impl ProcessingUnit {
    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> UnitStatus {
        UnitStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Transition to a new lifecycle state, transferring ownership of the
    /// unit's contents to the next actor class.
    pub fn set_status(&self, status: UnitStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }
}

/// Fixed-capacity sequence of processing units indexed by unit number.
#[derive(Debug)]
pub struct Ring {
    units: Box<[ProcessingUnit]>,
}

impl Ring {
    /// Allocate a ring sized for the given worker-thread budget: one unit per
    /// formatter thread, one for the producer to fill, one for the collector
    /// to drain, capped at [`MAX_RING_CAPACITY`].
    #[must_use]
    pub fn for_threads(max_threads: usize) -> Self {
        let capacity = (max_threads + 2).min(MAX_RING_CAPACITY);
        let units = (0..capacity).map(|_| ProcessingUnit::default()).collect();
        Self { units }
    }

    /// Number of units; at most this many submissions can be in flight.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.units.len()
    }

    /// The unit a given unit number maps onto.
    #[must_use]
    pub fn unit(&self, unit_number: u64) -> &ProcessingUnit {
        &self.units[(unit_number % self.units.len() as u64) as usize]
    }
}
