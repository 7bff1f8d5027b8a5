// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded cooperative scheduler.
//!
//! Owns the table of in-flight (wait condition → coroutine) entries, the
//! readiness poller and the clock. One tick:
//!
//! 1. start computations queued through a [`Spawner`] and apply the
//!    cancellations it requested
//! 2. poll for readiness, blocking at most until the nearest timer
//! 3. snapshot every matured entry
//! 4. resume them in insertion order, installing whatever they wait on next
//!
//! Entries are keyed by a sequence number that grows with every install,
//! so iteration order is insertion order. Timers are indexed by a min-heap
//! of `(deadline, seq)`; heap nodes whose entry is gone are skipped lazily.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::panic::Location;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::cancel::ShutdownToken;
use crate::clock::{Clock, SystemClock};
use crate::condition::{Wait, WaitCondition};
use crate::config::SchedulerConfig;
use crate::coroutine::{Computation, Coroutine};
use crate::error::{Error, Fault, FaultReport, Result};
use crate::poller::{EpollPoller, ReadinessPoller, ReadySet};
use crate::resource::Resource;
use crate::spawn::{SpawnQueue, Spawner};

pub use crate::spawn::TaskId;

type FaultHook = Box<dyn FnMut(&FaultReport)>;

/// Heap size below which stale timer nodes are left for lazy removal.
const COMPACT_MIN: usize = 64;

/// One tracked wait and the coroutine blocked on it.
struct Entry {
    task: TaskId,
    condition: WaitCondition,
    coroutine: Coroutine,
}

pub struct Scheduler<P: ReadinessPoller = EpollPoller, C: Clock = SystemClock> {
    poller: P,
    clock: C,
    config: SchedulerConfig,
    /// seq → entry. Ordered, so iteration is insertion order.
    entries: BTreeMap<u64, Entry>,
    /// task → seq of its current entry.
    tasks: HashMap<TaskId, u64>,
    /// resource → seq of the entry holding its registration.
    by_resource: HashMap<Resource, u64>,
    timers: BinaryHeap<Reverse<(Instant, u64)>>,
    next_seq: u64,
    /// Resources reported by the most recent poll.
    ready: ReadySet,
    spawns: Rc<SpawnQueue>,
    shutdown: ShutdownToken,
    on_fault: Option<FaultHook>,
}

impl Scheduler {
    /// Epoll-backed scheduler on the wall clock.
    pub fn new() -> Result<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        let poller = EpollPoller::with_capacity(config.max_events)?;
        Ok(Self::with_parts(poller, SystemClock, config))
    }
}

impl<P: ReadinessPoller, C: Clock> Scheduler<P, C> {
    pub fn with_parts(poller: P, clock: C, config: SchedulerConfig) -> Self {
        Self {
            poller,
            clock,
            config,
            entries: BTreeMap::new(),
            tasks: HashMap::new(),
            by_resource: HashMap::new(),
            timers: BinaryHeap::new(),
            next_seq: 0,
            ready: ReadySet::new(),
            spawns: Rc::new(SpawnQueue::default()),
            shutdown: ShutdownToken::new(),
            on_fault: None,
        }
    }

    /// Handle for queueing work from inside computations.
    pub fn spawner(&self) -> Spawner {
        Spawner::new(self.spawns.clone())
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Called for every coroutine torn down by a fault.
    pub fn on_fault(&mut self, hook: impl FnMut(&FaultReport) + 'static) {
        self.on_fault = Some(Box::new(hook));
    }

    pub fn poller(&self) -> &P {
        &self.poller
    }

    pub fn poller_mut(&mut self) -> &mut P {
        &mut self.poller
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nothing tracked and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.entries.is_empty() && self.spawns.is_empty()
    }

    pub fn is_tracked(&self, task: TaskId) -> bool {
        self.tasks.contains_key(&task)
    }

    /// The condition `task` is currently blocked on.
    pub fn condition_of(&self, task: TaskId) -> Option<WaitCondition> {
        let seq = self.tasks.get(&task)?;
        self.entries.get(seq).map(|e| e.condition)
    }

    /// Start `computation` and track the wait it first blocks on.
    ///
    /// Returns `Ok(None)` if it completed without suspending; nothing is
    /// tracked then. A fault in `start` or a refused registration is
    /// returned and nothing is tracked either.
    #[track_caller]
    pub fn spawn(&mut self, computation: impl Computation + 'static) -> Result<Option<TaskId>> {
        let task = self.spawns.next_id();
        let coroutine = Coroutine::spawned_at(Box::new(computation), Location::caller());
        self.start(task, coroutine)
    }

    /// Remove `task` without resuming it. Its readiness registration, if
    /// any, is released. Tasks still queued by a [`Spawner`] are dropped
    /// from the queue. From inside a running computation use
    /// [`Spawner::cancel`] instead.
    pub fn cancel(&mut self, task: TaskId) -> Result<()> {
        let Some(seq) = self.tasks.remove(&task) else {
            if self.spawns.remove(task) {
                log::debug!("cancelled queued task {}", task);
                return Ok(());
            }
            return Err(Error::UnknownTask(task));
        };
        let Some(entry) = self.entries.remove(&seq) else {
            return Err(Error::UnknownTask(task));
        };
        if let Some(resource) = entry.condition.resource() {
            self.by_resource.remove(&resource);
        }
        entry.condition.release(&mut self.poller)?;
        self.compact_timers();
        log::debug!("cancelled task {}", task);
        Ok(())
    }

    /// Run until idle (or forever, see [`SchedulerConfig::exit_when_idle`])
    /// or until the shutdown token is set. Only a poller failure is an error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.shutdown.is_shutdown() {
                log::debug!("shutdown requested, {} task(s) left", self.entries.len());
                return Ok(());
            }
            if self.config.exit_when_idle && self.is_idle() {
                return Ok(());
            }
            self.tick_until(None)?;
        }
    }

    /// Run ticks until the clock passes `start + duration`. Polls never
    /// block past that point.
    pub fn run_for(&mut self, duration: Duration) -> Result<()> {
        let until = self.clock.now() + duration;
        loop {
            if self.shutdown.is_shutdown() {
                return Ok(());
            }
            if self.config.exit_when_idle && self.is_idle() {
                return Ok(());
            }
            if self.clock.now() >= until {
                return Ok(());
            }
            self.tick_until(Some(until))?;
        }
    }

    /// One iteration of the run loop. Returns how many coroutines resumed.
    pub fn tick(&mut self) -> Result<usize> {
        self.tick_until(None)
    }

    fn tick_until(&mut self, limit: Option<Instant>) -> Result<usize> {
        if self.shutdown.is_shutdown() {
            return Ok(0);
        }
        self.start_queued();
        self.apply_cancellations()?;
        if self.config.exit_when_idle && self.is_idle() {
            return Ok(0);
        }

        let now = self.clock.now();
        let next = self.next_timeout(now);
        let mut timeout = self.config.cap(next);
        if let Some(limit) = limit {
            let left = limit.saturating_duration_since(now);
            timeout = Some(timeout.map_or(left, |t| t.min(left)));
        }
        if !self.spawns.is_empty() {
            timeout = Some(Duration::ZERO);
        }

        self.ready = self.poller.poll(timeout).map_err(|e| {
            log::error!("{}", e);
            e
        })?;

        // Time moved while we were blocked in the poller.
        let now = self.clock.now();
        let matured = self.matured(now);
        log::trace!(
            "tick: {} ready, {} matured, {} tracked",
            self.ready.len(),
            matured.len(),
            self.entries.len()
        );

        let mut resumed = 0;
        for seq in matured {
            if self.resume(seq)? {
                resumed += 1;
            }
            // A sibling cancelled by this resume must not run later in the tick.
            self.apply_cancellations()?;
        }
        Ok(resumed)
    }

    /// Cancel everything requested through [`Spawner::cancel`]. Tasks that
    /// already finished are skipped.
    fn apply_cancellations(&mut self) -> Result<()> {
        for task in self.spawns.take_cancelled() {
            match self.cancel(task) {
                Ok(()) | Err(Error::UnknownTask(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drop stale heap nodes once they outnumber live timers two to one.
    fn compact_timers(&mut self) {
        let live = self.entries.len() - self.by_resource.len();
        if self.timers.len() <= COMPACT_MIN.max(2 * live) {
            return;
        }
        let entries = &self.entries;
        self.timers.retain(|Reverse((_, seq))| entries.contains_key(seq));
        log::trace!("compacted timer heap to {} node(s)", self.timers.len());
    }

    /// Time until the nearest live timer, zero if it is already due.
    fn next_timeout(&mut self, now: Instant) -> Option<Duration> {
        while let Some(Reverse((deadline, seq))) = self.timers.peek().copied() {
            if self.entries.contains_key(&seq) {
                return Some(deadline.saturating_duration_since(now));
            }
            self.timers.pop();
        }
        None
    }

    /// Snapshot of matured entries, in insertion order. The table is not
    /// touched here.
    fn matured(&mut self, now: Instant) -> Vec<u64> {
        let mut candidates = Vec::new();

        while let Some(Reverse((deadline, seq))) = self.timers.peek().copied() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            candidates.push(seq);
        }
        candidates.extend(self.ready.iter().filter_map(|r| self.by_resource.get(r).copied()));

        candidates.sort_unstable();
        candidates.dedup();
        candidates.retain(|seq| {
            self.entries
                .get(seq)
                .is_some_and(|e| e.condition.is_mature(now, &self.ready))
        });
        candidates
    }

    /// Resume the entry at `seq`. `Ok(false)` if it is gone.
    fn resume(&mut self, seq: u64) -> Result<bool> {
        let Some(Entry {
            task,
            condition,
            mut coroutine,
        }) = self.entries.remove(&seq)
        else {
            return Ok(false);
        };
        self.tasks.remove(&task);

        // One-shot: the registration is consumed by this maturation.
        let delivered = condition.resource();
        if let Some(resource) = delivered {
            self.by_resource.remove(&resource);
            self.poller.unregister(resource)?;
        }

        log::trace!("resuming task {} after {:?}", task, condition);
        match coroutine.resume(delivered) {
            Ok(Some(wait)) => {
                if let Err(e) = self.install(task, wait, coroutine) {
                    self.report(task, Fault::Registration(Box::new(e)));
                }
            }
            Ok(None) => log::debug!("task {} completed", task),
            Err(fault) => self.report(task, fault),
        }
        Ok(true)
    }

    fn start(&mut self, task: TaskId, mut coroutine: Coroutine) -> Result<Option<TaskId>> {
        log::debug!("starting task {} from {}", task, coroutine.location());
        match coroutine.start() {
            Ok(Some(wait)) => {
                self.install(task, wait, coroutine)?;
                Ok(Some(task))
            }
            Ok(None) => {
                log::debug!("task {} completed without suspending", task);
                Ok(None)
            }
            Err(fault) => Err(Error::Fault(fault)),
        }
    }

    fn start_queued(&mut self) {
        for (task, coroutine) in self.spawns.drain() {
            match self.start(task, coroutine) {
                Ok(_) => {}
                Err(Error::Fault(fault)) => self.report(task, fault),
                Err(e) => self.report(task, Fault::Registration(Box::new(e))),
            }
        }
    }

    /// Build the condition for `wait` and track it.
    fn install(&mut self, task: TaskId, wait: Wait, coroutine: Coroutine) -> Result<()> {
        if let Wait::Readiness { resource, .. } = wait {
            if self.by_resource.contains_key(&resource) {
                return Err(Error::AlreadyRegistered(resource));
            }
        }
        let condition = WaitCondition::install(wait, self.clock.now(), &mut self.poller)?;

        let seq = self.next_seq;
        self.next_seq += 1;
        match condition {
            WaitCondition::Timer { deadline } => self.timers.push(Reverse((deadline, seq))),
            WaitCondition::ResourceReadiness { resource, .. } => {
                self.by_resource.insert(resource, seq);
            }
        }
        self.tasks.insert(task, seq);
        self.entries.insert(
            seq,
            Entry {
                task,
                condition,
                coroutine,
            },
        );
        Ok(())
    }

    fn report(&mut self, task: TaskId, fault: Fault) {
        log::warn!("task {} faulted: {}", task, fault);
        if let Some(hook) = self.on_fault.as_mut() {
            hook(&FaultReport { task, fault });
        }
    }
}

impl<P: ReadinessPoller, C: Clock> Drop for Scheduler<P, C> {
    fn drop(&mut self) {
        for resource in self.by_resource.keys() {
            let _ = self.poller.unregister(*resource);
        }
    }
}
