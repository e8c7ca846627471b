use mockall::mock;
use plc_runtime::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mock! {
    pub Storage {}

    impl Persistence for Storage {
        fn create_alarm_summary(&self, summary: &AlarmSummary) -> plc_runtime::Result<()>;
        fn get_tags(&self) -> plc_runtime::Result<Vec<Tag>>;
        fn get_alarms(&self) -> plc_runtime::Result<Vec<AlarmRecord>>;
        fn put_tag(&self, tag: &Tag) -> plc_runtime::Result<()>;
        fn put_alarm(&self, alarm: &AlarmRecord) -> plc_runtime::Result<()>;
        fn delete_tag(&self, id: &str) -> plc_runtime::Result<()>;
        fn delete_alarm(&self, id: &str) -> plc_runtime::Result<()>;
    }
}

fn offline() -> PlcError {
    PlcError::Persistence("storage offline".to_string())
}

fn pressure(name: &str) -> TagSpec {
    TagSpec::new(name, Variable::Pressure, "Pa", DataType::Float)
}

/// Subscribes one tag and does nothing else
struct Watcher;

impl MachineLogic for Watcher {
    fn on_running(&mut self, _core: &mut MachineCore) -> Result<()> {
        Ok(())
    }
}

fn watcher(runtime: &Runtime, name: &str, tag: &str) -> Box<dyn Machine> {
    let mut core = MachineCore::new(
        MachineSettings::new(name, Duration::from_millis(100)),
        runtime.store().clone(),
    );
    core.subscribe("watched", tag, true).unwrap();
    Box::new(StateMachine::new(core, Watcher))
}

#[test]
fn test_rename_refused_while_machine_subscribed() {
    let runtime = Runtime::new(RuntimeConfig::default(), Arc::new(MemoryPersistence::new()));
    let tag = runtime.add_tag(pressure("T1")).unwrap();
    runtime.append_machine(watcher(&runtime, "M1", "T1")).unwrap();

    let err = runtime.update_tag(&tag.id, TagUpdate::rename("T1-renamed")).unwrap_err();
    assert!(matches!(err, PlcError::TagInUse { .. }));
    assert!(err.to_string().contains("M1"), "{}", err);

    // the store refuses on its own as well
    let err = runtime
        .store()
        .update_tag(&tag.id, TagUpdate::rename("T1-renamed"))
        .unwrap_err();
    assert!(err.to_string().contains("M1"), "{}", err);

    assert_eq!(runtime.store().get_tag(&tag.id).unwrap().name, "T1");
}

#[test]
fn test_delete_tag_refused_while_alarm_references_it() {
    let persistence = Arc::new(MemoryPersistence::new());
    let runtime = Runtime::new(RuntimeConfig::default(), persistence.clone());
    let tag = runtime.add_tag(pressure("T1")).unwrap();
    let alarm = runtime
        .add_alarm(AlarmSpec::new("A1", "T1", Trigger::new(TriggerType::High, 10.0)))
        .unwrap();

    let err = runtime.delete_tag(&tag.id).unwrap_err();
    assert!(err.to_string().contains("A1"), "{}", err);
    assert!(runtime.store().contains("T1"));

    runtime.alarms().delete_alarm(&alarm.identifier).unwrap();
    runtime.delete_tag(&tag.id).unwrap();
    assert!(!runtime.store().contains("T1"));
    assert!(persistence.get_tags().unwrap().is_empty());
}

#[test]
fn test_reload_restores_once() {
    let persistence = Arc::new(MemoryPersistence::new());
    {
        let first = Runtime::new(RuntimeConfig::default(), persistence.clone());
        first.add_tag(pressure("T1")).unwrap();
        first.add_tag(pressure("T2")).unwrap();
        first
            .add_alarm(AlarmSpec::new("A1", "T1", Trigger::new(TriggerType::High, 10.0)))
            .unwrap();
    }

    let second = Runtime::new(RuntimeConfig::default(), persistence);
    let report = second.reload().unwrap();
    assert_eq!(report.tags_loaded, 2);
    assert_eq!(report.alarms_loaded, 1);

    let again = second.reload().unwrap();
    assert_eq!(again.tags_loaded, 0);
    assert_eq!(again.alarms_loaded, 0);
    assert_eq!(again.tags_skipped, 2);
    assert_eq!(again.alarms_skipped, 1);
    assert_eq!(second.store().len(), 2);
    assert_eq!(second.alarms().len(), 1);

    // reloaded alarms are live
    second.store().set_value_by_name("T1", 20.0, None).unwrap();
    second.alarms().tick();
    assert_eq!(
        second.alarms().get_alarm_by_name("A1").unwrap().state,
        AlarmState::Unack
    );
}

#[test]
fn test_storage_outage_never_blocks_the_core() {
    let mut storage = MockStorage::new();
    storage.expect_get_tags().times(1).returning(|| Err(offline()));
    storage.expect_get_alarms().times(1).returning(|| Err(offline()));
    storage.expect_put_tag().returning(|_| Err(offline()));
    storage.expect_put_alarm().returning(|_| Err(offline()));
    storage
        .expect_create_alarm_summary()
        .times(1)
        .returning(|_| Err(offline()));

    let runtime = Runtime::new(RuntimeConfig::default(), Arc::new(storage));
    assert_eq!(runtime.reload().unwrap(), ReloadReport::default());

    runtime.add_tag(pressure("T1")).unwrap();
    runtime
        .add_alarm(AlarmSpec::new("A1", "T1", Trigger::new(TriggerType::High, 10.0)))
        .unwrap();
    runtime.store().set_value_by_name("T1", 11.0, None).unwrap();
    runtime.alarms().tick();

    assert_eq!(
        runtime.alarms().get_alarm_by_name("A1").unwrap().state,
        AlarmState::Unack
    );
}

#[test]
fn test_summaries_appended_to_jsonl_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlSummaryLog::open(dir.path().join("audit/alarms.jsonl")).unwrap());
    let runtime = Runtime::new(RuntimeConfig::default(), log.clone());
    runtime.add_tag(pressure("T1")).unwrap();
    let alarm = runtime
        .add_alarm(AlarmSpec::new("A1", "T1", Trigger::new(TriggerType::Low, 5.0)))
        .unwrap();

    runtime.store().set_value_by_name("T1", 1.0, None).unwrap();
    runtime.alarms().tick();
    runtime.alarms().acknowledge(&alarm.identifier).unwrap();

    let summaries = log.read_all().unwrap();
    let states: Vec<AlarmState> = summaries.iter().map(|s| s.state).collect();
    assert_eq!(states, vec![AlarmState::Unack, AlarmState::Acked]);
    assert!(summaries.iter().all(|s| s.name == "A1"));
}

const PLANT: &str = r#"
alarm_manager:
  tick_ms: 20
tags:
  - name: PT-101
    variable: Pressure
    unit: kPa
  - name: TT-201
    variable: Temperature
    unit: degC
alarms:
  - name: PT-101-HI
    tag: PT-101
    trigger: { type: HIGH, value: 850.0 }
machines:
  - name: daq
    interval_ms: 20
    tags: [PT-101]
    source: { amplitude: 1.0, offset: 900.0, seed: 42 }
"#;

#[test]
fn test_yaml_plant_runs_end_to_end() {
    let config = RuntimeConfig::from_yaml(PLANT).unwrap();
    let runtime = Runtime::new(config, Arc::new(NullPersistence));
    runtime.load_config().unwrap();
    // loading twice creates nothing new
    runtime.load_config().unwrap();

    assert_eq!(runtime.store().len(), 2);
    assert_eq!(runtime.alarms().len(), 1);
    assert_eq!(runtime.scheduler().machine_names(), vec!["daq"]);
    assert_eq!(runtime.tag_users("PT-101"), vec!["PT-101-HI", "daq"]);

    runtime.start().unwrap();
    thread::sleep(Duration::from_millis(400));
    runtime.shutdown();

    let pressure = runtime.store().get_tag_by_name("PT-101").unwrap();
    assert!(pressure.value.as_float().unwrap() > 850.0);
    assert_eq!(
        runtime.alarms().get_alarm_by_name("PT-101-HI").unwrap().state,
        AlarmState::Unack
    );
    assert_eq!(runtime.scheduler().info("daq").unwrap().state, "running");
}

struct Bridge {
    subscribed: parking_lot::Mutex<Vec<String>>,
}

impl ProtocolBridge for Bridge {
    fn get_node_id_by_namespace(&self, namespace: &str) -> Option<String> {
        Some(format!("node:{}", namespace))
    }

    fn subscribe(&self, tag: &Tag) -> Result<()> {
        self.subscribed.lock().push(tag.name.clone());
        Ok(())
    }

    fn unsubscribe(&self, tag: &Tag) -> Result<()> {
        self.subscribed.lock().retain(|t| *t != tag.name);
        Ok(())
    }
}

#[test]
fn test_bridge_feeds_bound_tags() {
    let runtime = Runtime::new(RuntimeConfig::default(), Arc::new(NullPersistence));
    runtime
        .add_tag(pressure("PT-1").with_node("opc.tcp://plc:4840", "ns=2;s=PT1"))
        .unwrap();
    runtime.add_tag(pressure("PT-2")).unwrap();

    let bridge = Arc::new(Bridge {
        subscribed: parking_lot::Mutex::new(Vec::new()),
    });
    let ingress = runtime.attach_bridge(Some("opc.tcp://plc:4840".to_string()), bridge.clone());
    assert_eq!(*bridge.subscribed.lock(), vec!["PT-1"]);

    ingress.deliver("ns=2;s=PT1", 42.0, None).unwrap();
    assert_eq!(
        runtime.store().get_tag_by_name("PT-1").unwrap().value,
        Value::Float(42.0)
    );

    runtime.shutdown();
    assert!(bridge.subscribed.lock().is_empty());
}
