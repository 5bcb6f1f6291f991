use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Condvar, Mutex};

use crate::{FaultKind, FaultSource, MemoryManager, RegisterFile, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId {
    pub const MAIN: ThreadId = ThreadId(0);
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// How a spawned engine sees its parent's register file and memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// The child gets copies taken at spawn time.
    #[default]
    Isolated,
    /// Parent and child use the same stores, each behind its own lock.
    Shared,
}

pub type SharedRegisters = Arc<Mutex<RegisterFile>>;
pub type SharedMemory = Arc<Mutex<MemoryManager>>;

/// Everything a spawned engine starts from besides the program itself.
/// Stacks are not part of it, every engine builds fresh ones.
pub struct ThreadContext {
    pub entry: usize,
    pub registers: SharedRegisters,
    pub memory: SharedMemory,
    pub faults: FaultSource,
}

impl ThreadContext {
    pub fn new(
        entry: usize,
        registers: &SharedRegisters,
        memory: &SharedMemory,
        isolation: Isolation,
        faults: FaultSource,
    ) -> Self {
        let (registers, memory) = match isolation {
            Isolation::Shared => (Arc::clone(registers), Arc::clone(memory)),
            Isolation::Isolated => (
                Arc::new(Mutex::new(registers.lock().clone())),
                Arc::new(Mutex::new(memory.lock().clone())),
            ),
        };
        Self {
            entry,
            registers,
            memory,
            faults,
        }
    }
}

/// Where one spawned thread is in its life.
#[derive(Debug)]
enum Slot {
    Running(JoinHandle<RunOutcome>),
    /// Some caller holds the handle and is blocked on it.
    Joining,
    Finished(RunOutcome),
}

#[derive(Debug, Default)]
struct HostState {
    threads: BTreeMap<ThreadId, Slot>,
    /// Joiner to the thread it waits for.
    waiting: HashMap<ThreadId, ThreadId>,
}

impl HostState {
    /// Whether `joiner` waiting for `target` closes a cycle of joins.
    fn closes_cycle(&self, joiner: ThreadId, target: ThreadId) -> bool {
        let mut current = target;
        for _ in 0..=self.waiting.len() {
            if current == joiner {
                return true;
            }
            match self.waiting.get(&current) {
                Some(&next) => current = next,
                None => return false,
            }
        }
        false
    }
}

/// Owns the OS threads spawned by `THREAD` and their outcomes.
///
/// Any number of callers may join the same thread. The first one takes the
/// handle; later ones wait on `settled` until the outcome is recorded.
#[derive(Debug)]
pub struct ThreadHost {
    next_id: AtomicU64,
    state: Mutex<HostState>,
    settled: Condvar,
}

impl ThreadHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(ThreadId::MAIN.0 + 1),
            state: Mutex::new(HostState::default()),
            settled: Condvar::new(),
        }
    }

    pub fn spawn<F>(&self, f: F) -> Result<ThreadId, FaultKind>
    where
        F: FnOnce(ThreadId) -> RunOutcome + Send + 'static,
    {
        let id = ThreadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = thread::Builder::new()
            .name(format!("clv-{id}"))
            .spawn(move || f(id))
            .map_err(|err| FaultKind::SpawnFailed(err.to_string()))?;
        self.state.lock().threads.insert(id, Slot::Running(handle));
        log::debug!("host: spawned {id}");
        Ok(id)
    }

    /// Waits for `id` on behalf of `joiner`. Joining an already finished
    /// thread returns its recorded outcome.
    pub fn join(
        &self,
        joiner: ThreadId,
        id: ThreadId,
    ) -> Result<RunOutcome, FaultKind> {
        if joiner == id {
            return Err(FaultKind::SelfJoin(id.0));
        }
        let mut state = self.state.lock();
        let handle = loop {
            let slot = state
                .threads
                .remove(&id)
                .ok_or(FaultKind::UnknownThread(id.0 as i64))?;
            match slot {
                Slot::Finished(outcome) => {
                    state.threads.insert(id, Slot::Finished(outcome.clone()));
                    return Ok(outcome);
                }
                slot if state.closes_cycle(joiner, id) => {
                    state.threads.insert(id, slot);
                    log::warn!("host: {joiner} joining {id} would deadlock");
                    return Err(FaultKind::JoinCycle(id.0));
                }
                Slot::Joining => {
                    state.threads.insert(id, Slot::Joining);
                    state.waiting.insert(joiner, id);
                    self.settled.wait(&mut state);
                    state.waiting.remove(&joiner);
                    self.settled.notify_all();
                }
                Slot::Running(handle) => {
                    state.threads.insert(id, Slot::Joining);
                    state.waiting.insert(joiner, id);
                    break handle;
                }
            }
        };
        drop(state);

        let outcome = self.settle(id, handle);
        self.state.lock().waiting.remove(&joiner);
        self.settled.notify_all();
        log::debug!("host: {joiner} joined {id}, {:?}", outcome.state);
        Ok(outcome)
    }

    /// Joins every thread, including ones spawned while waiting and ones
    /// another caller is joining, and lets pending joiners collect their
    /// outcome first. Hands back all outcomes ordered by thread id. The host
    /// forgets them afterwards.
    pub fn join_all(&self) -> Vec<(ThreadId, RunOutcome)> {
        let mut state = self.state.lock();
        loop {
            let running = state
                .threads
                .iter()
                .find(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(&id, _)| id);
            if let Some(id) = running {
                if let Some(Slot::Running(handle)) =
                    state.threads.insert(id, Slot::Joining)
                {
                    drop(state);
                    self.settle(id, handle);
                    state = self.state.lock();
                }
                continue;
            }
            let joining = state
                .threads
                .values()
                .any(|slot| matches!(slot, Slot::Joining));
            if joining || !state.waiting.is_empty() {
                self.settled.wait(&mut state);
                continue;
            }
            break;
        }

        std::mem::take(&mut state.threads)
            .into_iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Finished(outcome) => Some((id, outcome)),
                Slot::Running(_) | Slot::Joining => None,
            })
            .collect()
    }

    /// Threads not yet finished.
    #[must_use]
    pub fn active(&self) -> usize {
        self.state
            .lock()
            .threads
            .values()
            .filter(|slot| !matches!(slot, Slot::Finished(_)))
            .count()
    }

    fn settle(&self, id: ThreadId, handle: JoinHandle<RunOutcome>) -> RunOutcome {
        let outcome = handle.join().unwrap_or_else(|_| {
            log::error!("host: {id} panicked");
            RunOutcome::panicked()
        });
        self.state
            .lock()
            .threads
            .insert(id, Slot::Finished(outcome.clone()));
        self.settled.notify_all();
        outcome
    }
}

impl Default for ThreadHost {
    fn default() -> Self {
        Self::new()
    }
}
