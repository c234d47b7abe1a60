//! Typed event system with pre-allocated ring buffers.
//!
//! Events are emitted by editor mutations, the fault layer, the scheduler
//! and the tick itself, and delivered in batch at the end of each tick (or
//! on demand). Each event type has its own [`EventBuffer`] ring buffer with
//! a configurable capacity.
//!
//! # Suppression
//!
//! Event types can be suppressed via [`EventBus::suppress`], which prevents
//! any allocation or recording for that type. Suppressed events have zero cost.

use crate::fault::FaultKind;
use crate::fixed::Ticks;
use crate::id::*;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An engine event. All events carry the tick counter at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Topology --
    EquipmentAdded {
        equipment: EquipmentId,
        kind: KindId,
        tick: Ticks,
    },
    EquipmentRemoved {
        equipment: EquipmentId,
        tick: Ticks,
    },
    PipeAdded {
        pipe: PipeId,
        to: EquipmentId,
        tick: Ticks,
    },
    PipeRemoved {
        pipe: PipeId,
        tick: Ticks,
    },

    // -- Faults --
    FaultInjected {
        fault: FaultId,
        equipment: EquipmentId,
        kind: FaultKind,
        tick: Ticks,
    },
    FaultCleared {
        fault: FaultId,
        equipment: EquipmentId,
        tick: Ticks,
    },

    // -- Vessels --
    /// Level reached 100 % this tick.
    VesselFull {
        equipment: EquipmentId,
        tick: Ticks,
    },
    /// Level reached 0 % this tick.
    VesselEmpty {
        equipment: EquipmentId,
        tick: Ticks,
    },

    // -- Scheduler --
    SchedulerStarted {
        tick: Ticks,
    },
    SchedulerStopped {
        tick: Ticks,
    },
    EmergencyStop {
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EquipmentAdded,
    EquipmentRemoved,
    PipeAdded,
    PipeRemoved,
    FaultInjected,
    FaultCleared,
    VesselFull,
    VesselEmpty,
    SchedulerStarted,
    SchedulerStopped,
    EmergencyStop,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 11;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::EquipmentAdded { .. } => EventKind::EquipmentAdded,
            Event::EquipmentRemoved { .. } => EventKind::EquipmentRemoved,
            Event::PipeAdded { .. } => EventKind::PipeAdded,
            Event::PipeRemoved { .. } => EventKind::PipeRemoved,
            Event::FaultInjected { .. } => EventKind::FaultInjected,
            Event::FaultCleared { .. } => EventKind::FaultCleared,
            Event::VesselFull { .. } => EventKind::VesselFull,
            Event::VesselEmpty { .. } => EventKind::VesselEmpty,
            Event::SchedulerStarted { .. } => EventKind::SchedulerStarted,
            Event::SchedulerStopped { .. } => EventKind::SchedulerStopped,
            Event::EmergencyStop { .. } => EventKind::EmergencyStop,
        }
    }

    /// The tick counter value carried by the event.
    pub fn tick(&self) -> Ticks {
        match *self {
            Event::EquipmentAdded { tick, .. }
            | Event::EquipmentRemoved { tick, .. }
            | Event::PipeAdded { tick, .. }
            | Event::PipeRemoved { tick, .. }
            | Event::FaultInjected { tick, .. }
            | Event::FaultCleared { tick, .. }
            | Event::VesselFull { tick, .. }
            | Event::VesselEmpty { tick, .. }
            | Event::SchedulerStarted { tick }
            | Event::SchedulerStopped { tick }
            | Event::EmergencyStop { tick } => tick,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer: pre-allocated ring buffer
// ---------------------------------------------------------------------------

/// Largest per-kind buffer capacity. Larger requests are lowered to this.
pub const MAX_EVENT_CAPACITY: usize = 1 << 16;

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<Event>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
    /// Total events ever written (including dropped).
    total_written: u64,
}

impl EventBuffer {
    /// Create a new ring buffer with the given capacity.
    /// The capacity is clamped to [1, [`MAX_EVENT_CAPACITY`]].
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_EVENT_CAPACITY);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    /// Push an event into the ring buffer. If full, the oldest event is dropped.
    pub fn push(&mut self, event: Event) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total events written since creation (including dropped).
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of events that were dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity() as u64)
    }

    /// Iterate over events in order from oldest to newest.
    pub fn iter(&self) -> EventBufferIter<'_> {
        let start = if self.len < self.capacity() {
            0
        } else {
            // head is the next write position, i.e. the oldest entry
            self.head
        };
        EventBufferIter {
            buffer: self,
            index: start,
            remaining: self.len,
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

/// Iterator over events in an [`EventBuffer`], from oldest to newest.
pub struct EventBufferIter<'a> {
    buffer: &'a EventBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for EventBufferIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let event = self.buffer.events[self.index].as_ref();
        self.index = (self.index + 1) % self.buffer.capacity();
        self.remaining -= 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EventBufferIter<'_> {}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only. Listeners must be `Send`
/// so the engine can move between threads.
pub type PassiveListener = Box<dyn FnMut(&Event) + Send>;

/// Optional predicate that filters events for a listener.
pub type EventFilter = Box<dyn Fn(&Event) -> bool + Send>;

/// Priority level for event listeners. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct ListenerEntry {
    listener: PassiveListener,
    priority: ListenerPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// The central event bus. Holds one ring buffer per event kind, listener
/// lists, and suppression flags.
pub struct EventBus {
    /// One lazily allocated ring buffer per event kind.
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<ListenerEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
    /// Monotonically increasing counter for stable sort ordering.
    next_insertion_order: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("default_capacity", &self.default_capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a new event bus with the given default buffer capacity per type.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: std::array::from_fn(|_| Vec::new()),
            default_capacity,
            next_insertion_order: 0,
        }
    }

    /// Suppress an event kind. Suppressed events are never allocated or buffered.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    /// Lift a suppression set with [`suppress`](Self::suppress).
    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Emit an event. Stores it in the appropriate ring buffer. No-ops if
    /// the event kind is suppressed.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    /// Register a passive listener with Normal priority and no filter.
    /// Listeners are called in registration order during delivery.
    pub fn on(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_filtered(kind, ListenerPriority::Normal, None, listener);
    }

    /// Register a passive listener with explicit priority and optional filter.
    pub fn on_filtered(
        &mut self,
        kind: EventKind,
        priority: ListenerPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        self.listeners[kind.index()].push(ListenerEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
    }

    /// Deliver all buffered events to listeners, then clear the buffers.
    ///
    /// Per kind, listeners run in `(priority, insertion_order)` order and
    /// see events oldest-to-newest. A listener whose filter rejects an event
    /// is skipped for that event.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            if self.suppressed[idx] {
                continue;
            }
            let Some(buffer) = self.buffers[idx].as_ref() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }

            // Copy out so the buffer borrow does not overlap the listeners.
            let events: Vec<Event> = buffer.iter().cloned().collect();

            self.listeners[idx].sort_by_key(|entry| (entry.priority, entry.insertion_order));
            for entry in &mut self.listeners[idx] {
                for event in &events {
                    if let Some(ref filter) = entry.filter
                        && !filter(event)
                    {
                        continue;
                    }
                    (entry.listener)(event);
                }
            }

            if let Some(buffer) = self.buffers[idx].as_mut() {
                buffer.clear();
            }
        }
    }

    /// Read-only view of the buffer for one event kind.
    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    /// Number of undelivered events of a kind.
    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffers[kind.index()]
            .as_ref()
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Total events ever emitted for a kind (including dropped).
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()]
            .as_ref()
            .map(|b| b.total_written())
            .unwrap_or(0)
    }

    /// Clear all buffers. Does not remove listeners or suppression settings.
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
