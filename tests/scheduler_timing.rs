use plc_runtime::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Counts its steps and burns `work` on each one
struct Worker {
    name: String,
    interval: Duration,
    work: Duration,
    runs: Arc<AtomicU64>,
}

impl Worker {
    fn boxed(name: &str, interval_ms: u64, work_ms: u64) -> (Box<dyn Machine>, Arc<AtomicU64>) {
        let runs = Arc::new(AtomicU64::new(0));
        let worker = Self {
            name: name.to_string(),
            interval: Duration::from_millis(interval_ms),
            work: Duration::from_millis(work_ms),
            runs: runs.clone(),
        };
        (Box::new(worker), runs)
    }
}

impl Machine for Worker {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn execute(&mut self) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.work);
        Ok(())
    }

    fn info(&self) -> MachineInfo {
        MachineInfo {
            name: self.name.clone(),
            state: "running".to_string(),
            interval_ms: self.interval.as_millis() as u64,
            classification: "test".to_string(),
            priority: 0,
            description: String::new(),
            process_variables: Vec::new(),
            buffers: Default::default(),
            allowed_transitions: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn transition(&mut self, event: &str) -> Result<MachineInfo> {
        Err(PlcError::IllegalTransition {
            entity: self.name.clone(),
            action: event.to_string(),
            state: "running".to_string(),
        })
    }
}

#[test]
fn test_async_machines_keep_their_own_rate() {
    let scheduler = Scheduler::new(SchedulerMode::Async);
    let (fast, fast_runs) = Worker::boxed("M1", 50, 1);
    // the slow machine spends most of its period busy
    let (slow, slow_runs) = Worker::boxed("M2", 500, 200);
    scheduler.append_machine(fast).unwrap();
    scheduler.append_machine(slow).unwrap();

    scheduler.start().unwrap();
    thread::sleep(Duration::from_millis(1000));
    scheduler.stop();

    let fast = fast_runs.load(Ordering::SeqCst);
    let slow = slow_runs.load(Ordering::SeqCst);
    assert!((15..=22).contains(&fast), "M1 ran {} times", fast);
    assert!((2..=3).contains(&slow), "M2 ran {} times", slow);
}

#[test]
fn test_dropping_one_machine_leaves_the_other_running() {
    let scheduler = Scheduler::new(SchedulerMode::Async);
    let (a, a_runs) = Worker::boxed("A", 20, 0);
    let (b, b_runs) = Worker::boxed("B", 20, 0);
    scheduler.append_machine(a).unwrap();
    scheduler.append_machine(b).unwrap();
    scheduler.start().unwrap();

    thread::sleep(Duration::from_millis(100));
    scheduler.drop_machine("A").unwrap();
    let a_at_drop = a_runs.load(Ordering::SeqCst);
    let b_at_drop = b_runs.load(Ordering::SeqCst);

    thread::sleep(Duration::from_millis(200));
    scheduler.stop();

    assert_eq!(a_runs.load(Ordering::SeqCst), a_at_drop);
    assert!(b_runs.load(Ordering::SeqCst) > b_at_drop + 3);
    assert_eq!(scheduler.machine_names(), vec!["B"]);
}

#[test]
fn test_sync_mode_interleaves_on_one_thread() {
    let scheduler = Scheduler::new(SchedulerMode::Sync);
    let (fast, fast_runs) = Worker::boxed("fast", 50, 0);
    let (slow, slow_runs) = Worker::boxed("slow", 100, 0);
    scheduler.append_machine(fast).unwrap();
    scheduler.append_machine(slow).unwrap();

    scheduler.start().unwrap();
    thread::sleep(Duration::from_millis(520));
    scheduler.stop();

    let fast = fast_runs.load(Ordering::SeqCst);
    let slow = slow_runs.load(Ordering::SeqCst);
    assert!(fast >= 7, "fast ran {} times", fast);
    assert!(slow >= 3, "slow ran {} times", slow);
    assert!(fast > slow);
}

#[test]
fn test_machine_joins_running_scheduler() {
    let scheduler = Scheduler::new(SchedulerMode::Async);
    let (late, late_runs) = Worker::boxed("late", 20, 0);
    assert!(scheduler.join(late).is_err());

    scheduler.start().unwrap();
    let (late, late_runs_2) = Worker::boxed("late", 20, 0);
    scheduler.join(late).unwrap();
    thread::sleep(Duration::from_millis(100));
    scheduler.stop();

    assert_eq!(late_runs.load(Ordering::SeqCst), 0);
    assert!(late_runs_2.load(Ordering::SeqCst) >= 3);
    assert!(scheduler.stats("late").unwrap().cycles >= 3);
}
