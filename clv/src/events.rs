use parking_lot::Mutex;

use crate::{RuntimeFault, ThreadId, Value};

/// Observable output of a running program.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Printed(Value),
    Evicted(Vec<String>),
    Retried { pc: usize, attempt: u32 },
    Spawned { thread: ThreadId, entry: usize },
    Faulted(RuntimeFault),
    Halted,
}

/// Receives events from every engine of a run, tagged with the emitting
/// thread. Events from one thread arrive in execution order.
pub trait EventSink: Send + Sync {
    fn emit(&self, origin: ThreadId, event: Event);
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<(ThreadId, Event)>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<(ThreadId, Event)> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn for_thread(&self, thread: ThreadId) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(origin, _)| *origin == thread)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Printed values across all threads, in arrival order.
    #[must_use]
    pub fn printed(&self) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, event)| match event {
                Event::Printed(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for EventLog {
    fn emit(&self, origin: ThreadId, event: Event) {
        self.events.lock().push((origin, event));
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, origin: ThreadId, event: Event) {
        match event {
            Event::Printed(value) => log::info!("[{origin}] {value}"),
            Event::Evicted(names) => log::debug!("[{origin}] evicted {names:?}"),
            Event::Retried { pc, attempt } => {
                log::debug!("[{origin}] ping retry {attempt} at pc {pc}")
            }
            Event::Spawned { thread, entry } => {
                log::debug!("[{origin}] spawned {thread} at pc {entry}")
            }
            Event::Faulted(fault) => log::warn!("[{origin}] {fault}"),
            Event::Halted => log::debug!("[{origin}] halted"),
        }
    }
}
