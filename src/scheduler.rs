// src/scheduler.rs - Cooperative machine scheduler
//
// Every machine runs a deferred-call loop: execute one step, measure it,
// sleep for whatever is left of the interval. An overrun is reported and the
// next step starts immediately; cycles are never skipped or replayed.
//
// In async mode each machine owns a loop thread. In sync mode one shared
// thread interleaves all machines, always running the one that is due first.

use crate::{
    error::{PlcError, Result},
    machine::{Machine, MachineInfo},
    stop::StopSignal,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the shared loop sleeps when it has no machine at all
const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// One loop thread per machine
    #[default]
    Async,
    /// All machines share one loop thread
    Sync,
}

/// Execution statistics of one machine loop
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoopStats {
    pub cycles: u64,
    pub overruns: u64,
    pub errors: u64,
    pub panics: u64,
    pub last_elapsed_us: u64,
    pub max_elapsed_us: u64,
    pub last_run: Option<DateTime<Utc>>,
}

type SharedMachine = Arc<Mutex<Box<dyn Machine>>>;

struct MachineSlot {
    machine: SharedMachine,
    stats: Arc<Mutex<LoopStats>>,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

/// Run one step of `machine`; `None` when it was dropped in the meantime.
///
/// Errors and panics are logged and counted, never propagated.
fn run_cycle(
    name: &str,
    machine: &SharedMachine,
    stats: &Mutex<LoopStats>,
    registered: &dyn Fn() -> bool,
) -> Option<(Duration, Duration)> {
    let mut guard = machine.lock();
    if !registered() {
        return None;
    }
    let interval = guard.interval();
    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| guard.execute()));
    let elapsed = start.elapsed();
    drop(guard);

    let mut stats = stats.lock();
    stats.cycles += 1;
    stats.last_run = Some(Utc::now());
    stats.last_elapsed_us = elapsed.as_micros() as u64;
    stats.max_elapsed_us = stats.max_elapsed_us.max(stats.last_elapsed_us);
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            stats.errors += 1;
            warn!("Machine '{}' step failed: {}", name, e);
        }
        Err(_) => {
            stats.panics += 1;
            error!("Machine '{}' panicked; continuing with next cycle", name);
        }
    }
    if elapsed > interval {
        stats.overruns += 1;
        warn!(
            "Machine '{}' overran its interval: {:?} > {:?}",
            name, elapsed, interval
        );
    }
    Some((elapsed, interval))
}

fn machine_loop(
    name: String,
    machine: SharedMachine,
    stats: Arc<Mutex<LoopStats>>,
    stop: StopSignal,
) {
    debug!("Machine '{}' loop started", name);
    while !stop.is_stopped() {
        let Some((elapsed, interval)) = run_cycle(&name, &machine, &stats, &|| true) else {
            break;
        };
        if stop.wait_timeout(interval.saturating_sub(elapsed)) {
            break;
        }
    }
    debug!("Machine '{}' loop exited", name);
}

fn shared_loop(
    machines: Arc<DashMap<String, MachineSlot>>,
    order: Arc<Mutex<Vec<String>>>,
    stop: StopSignal,
) {
    debug!("Shared machine loop started");
    let mut next_due: HashMap<String, Instant> = HashMap::new();
    while !stop.is_stopped() {
        let names = order.lock().clone();
        next_due.retain(|name, _| names.contains(name));
        let now = Instant::now();
        for name in &names {
            next_due.entry(name.clone()).or_insert(now);
        }

        // min_by_key keeps the first of equal elements: ties go by append order
        let next = names
            .iter()
            .filter_map(|name| next_due.get(name).map(|due| (name, *due)))
            .min_by_key(|(_, due)| *due);
        let Some((name, due)) = next else {
            if stop.wait_timeout(IDLE_WAIT) {
                break;
            }
            continue;
        };
        let name = name.clone();

        let now = Instant::now();
        if due > now {
            if stop.wait_timeout(due - now) {
                break;
            }
            continue;
        }

        let Some((machine, stats)) = machines
            .get(&name)
            .map(|slot| (slot.machine.clone(), slot.stats.clone()))
        else {
            continue;
        };
        let registered = || machines.contains_key(&name);
        if let Some((elapsed, interval)) = run_cycle(&name, &machine, &stats, &registered) {
            next_due.insert(name, Instant::now() + interval.saturating_sub(elapsed));
        }
    }
    debug!("Shared machine loop exited");
}

/// Runs any number of machines at their own intervals.
///
/// Machines can be appended before or after [`Scheduler::start`] and dropped
/// at any time without disturbing the others. Stopping is cooperative: a
/// loop notices the stop request between steps, and sleeping loops wake up
/// immediately.
pub struct Scheduler {
    mode: SchedulerMode,
    machines: Arc<DashMap<String, MachineSlot>>,
    order: Arc<Mutex<Vec<String>>>,
    running: AtomicBool,
    shared_stop: StopSignal,
    shared_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(mode: SchedulerMode) -> Self {
        Self {
            mode,
            machines: Arc::new(DashMap::new()),
            order: Arc::new(Mutex::new(Vec::new())),
            running: AtomicBool::new(false),
            shared_stop: StopSignal::new(),
            shared_handle: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Add a machine. If the scheduler is already running it starts right away.
    pub fn append_machine(&self, machine: Box<dyn Machine>) -> Result<()> {
        let name = machine.name().to_string();
        let interval = machine.interval();
        {
            let mut order = self.order.lock();
            if self.machines.contains_key(&name) {
                return Err(PlcError::duplicate("Machine", name));
            }
            self.machines.insert(
                name.clone(),
                MachineSlot {
                    machine: Arc::new(Mutex::new(machine)),
                    stats: Arc::new(Mutex::new(LoopStats::default())),
                    stop: StopSignal::new(),
                    handle: None,
                },
            );
            order.push(name.clone());
        }
        info!("Machine '{}' appended (interval {:?})", name, interval);

        if self.is_running() && self.mode == SchedulerMode::Async {
            if let Some(mut slot) = self.machines.get_mut(&name) {
                Self::launch(&name, &mut slot)?;
            }
        }
        Ok(())
    }

    /// Insert a machine into a scheduler that is already running
    pub fn join(&self, machine: Box<dyn Machine>) -> Result<()> {
        if !self.is_running() {
            return Err(PlcError::Scheduler(format!(
                "Cannot join '{}': scheduler is not running",
                machine.name()
            )));
        }
        self.append_machine(machine)
    }

    fn launch(name: &str, slot: &mut MachineSlot) -> Result<()> {
        slot.stop.reset();
        let machine = slot.machine.clone();
        let stats = slot.stats.clone();
        let stop = slot.stop.clone();
        let loop_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("machine-{}", name))
            .spawn(move || machine_loop(loop_name, machine, stats, stop))?;
        slot.handle = Some(handle);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PlcError::Scheduler("Scheduler already running".to_string()));
        }
        info!("Starting {:?} scheduler with {} machines", self.mode, self.len());
        match self.mode {
            SchedulerMode::Async => {
                let names = self.order.lock().clone();
                for name in names {
                    if let Some(mut slot) = self.machines.get_mut(&name) {
                        Self::launch(&name, &mut slot)?;
                    }
                }
            }
            SchedulerMode::Sync => {
                self.shared_stop.reset();
                let machines = self.machines.clone();
                let order = self.order.clone();
                let stop = self.shared_stop.clone();
                let handle = thread::Builder::new()
                    .name("machine-shared".to_string())
                    .spawn(move || shared_loop(machines, order, stop))?;
                *self.shared_handle.lock() = Some(handle);
            }
        }
        Ok(())
    }

    /// Stop one machine's loop, unsubscribe it and forget it.
    ///
    /// Must not be called by a machine on itself from inside its own step.
    pub fn drop_machine(&self, name: &str) -> Result<()> {
        let slot = {
            let mut order = self.order.lock();
            let (_, slot) = self
                .machines
                .remove(name)
                .ok_or_else(|| PlcError::not_found("Machine", name))?;
            order.retain(|n| n != name);
            slot
        };
        slot.stop.trigger();
        if let Some(handle) = slot.handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Loop thread of machine '{}' panicked", name);
            }
        }
        slot.machine.lock().shutdown();
        info!("Machine '{}' dropped", name);
        Ok(())
    }

    /// Stop every loop and wait for them to finish their current step
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared_stop.trigger();
        let mut handles = Vec::new();
        for mut slot in self.machines.iter_mut() {
            slot.stop.trigger();
            if let Some(handle) = slot.handle.take() {
                handles.push((slot.key().clone(), handle));
            }
        }
        if let Some(handle) = self.shared_handle.lock().take() {
            handles.push(("shared".to_string(), handle));
        }
        let current = thread::current().id();
        for (name, handle) in handles {
            if handle.thread().id() != current && handle.join().is_err() {
                error!("Loop thread '{}' panicked", name);
            }
        }
        info!("Scheduler stopped");
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.machines.contains_key(name)
    }

    /// Machine names in append order
    pub fn machine_names(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    pub fn stats(&self, name: &str) -> Option<LoopStats> {
        self.machines.get(name).map(|slot| slot.stats.lock().clone())
    }

    fn handle(&self, name: &str) -> Result<SharedMachine> {
        self.machines
            .get(name)
            .map(|slot| slot.machine.clone())
            .ok_or_else(|| PlcError::not_found("Machine", name))
    }

    /// Run `f` on a machine between two of its steps
    pub fn with_machine<R>(&self, name: &str, f: impl FnOnce(&mut dyn Machine) -> R) -> Result<R> {
        let machine = self.handle(name)?;
        let mut guard = machine.lock();
        Ok(f(&mut **guard))
    }

    pub fn info(&self, name: &str) -> Result<MachineInfo> {
        self.with_machine(name, |m| m.info())
    }

    /// Snapshots of every machine in append order
    pub fn infos(&self) -> Vec<MachineInfo> {
        self.machine_names()
            .iter()
            .filter_map(|name| self.info(name).ok())
            .collect()
    }

    /// Operator transition, e.g. `reset` or `restart`
    pub fn transition(&self, name: &str, event: &str) -> Result<MachineInfo> {
        self.with_machine(name, |m| m.transition(event))?
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
