//! Scan scheduler scenarios on a simulated bus with a paused clock.

use std::time::Duration;
use tempreg::bus::serial_mock::{Reply, SimulatedBus};
use tempreg::constants::{CMD_MEASUREMENT, CMD_SERIAL_NUMBER, DEFAULT_MAX_RETRIES};
use tempreg::{
    CycleOutcome, MemoryRecorder, RecordError, ScanReport, ScanScheduler, ScanSettings, Timing,
};

fn settings(addresses: &[u8], min_scan_delay: Duration, scans: Option<u64>) -> ScanSettings {
    ScanSettings {
        device_path: "/dev/ttySIM".to_string(),
        addresses: addresses.to_vec(),
        min_scan_delay,
        scans,
        max_retries: DEFAULT_MAX_RETRIES,
        timing: Timing::default(),
    }
}

fn healthy(bus: &SimulatedBus, address: u8, serial_number: &str, value: &str) {
    bus.always(address, CMD_SERIAL_NUMBER, Reply::status(address, serial_number));
    bus.always(address, CMD_MEASUREMENT, Reply::ack(value));
}

async fn completed<C, R>(scheduler: &mut ScanScheduler<C, R>) -> ScanReport
where
    C: tempreg::Connector,
    R: tempreg::Recorder,
{
    match scheduler.run_once().await {
        CycleOutcome::Completed(report) => report,
        other => panic!("scan did not complete: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_good_one_silent_device() {
    let bus = SimulatedBus::new();
    healthy(&bus, 1, "SN001", "23.5");
    let recorder = MemoryRecorder::new();
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1, 2], Duration::ZERO, Some(1)),
    );

    let report = completed(&mut scheduler).await;

    assert_eq!(report.polled, vec![1]);
    assert_eq!(report.skipped, vec![2]);
    assert_eq!(report.recorded, 1);

    let readings = recorder.readings();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].serial_number, "SN001");
    assert_eq!(readings[0].value, "23.5");
    assert_eq!(
        Some(readings[0].observed_at),
        scheduler.device(1).unwrap().observed_at()
    );

    let silent = scheduler.device(2).unwrap();
    assert_eq!(silent.counters().sent, u64::from(DEFAULT_MAX_RETRIES));
    assert_eq!(silent.counters().received, 0);
    assert!(silent.serial_number().is_none());
    assert_eq!(bus.opens(), 1);
    assert_eq!(bus.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_minimum_scan_delay() {
    let bus = SimulatedBus::new();
    healthy(&bus, 1, "SN001", "23.5");
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        MemoryRecorder::new(),
        settings(&[1], Duration::from_secs(60), None),
    );

    completed(&mut scheduler).await;
    let requests = bus.requests().len();
    let counters = scheduler.device(1).unwrap().counters();

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(scheduler.run_once().await, CycleOutcome::NotDue));
    assert_eq!(bus.requests().len(), requests);
    assert_eq!(bus.opens(), 1);
    assert_eq!(scheduler.device(1).unwrap().counters(), counters);

    tokio::time::advance(Duration::from_secs(50)).await;
    completed(&mut scheduler).await;
    assert_eq!(bus.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_record_failure_does_not_stop_scan() {
    let bus = SimulatedBus::new();
    healthy(&bus, 1, "SN001", "23.5");
    healthy(&bus, 2, "SN002", "19.0");
    let recorder = MemoryRecorder::new();
    recorder.fail_for("SN001", RecordError::UnknownDevice("SN001".into()));
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1, 2], Duration::ZERO, None),
    );

    let report = completed(&mut scheduler).await;

    assert_eq!(report.record_failures, 1);
    assert_eq!(report.recorded, 1);
    assert_eq!(recorder.readings()[0].serial_number, "SN002");
    assert_eq!(bus.closes(), 1);

    completed(&mut scheduler).await;
    assert_eq!(recorder.readings().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_last_reading_recorded_after_failure() {
    let bus = SimulatedBus::new();
    bus.script(1, CMD_SERIAL_NUMBER, [Reply::status(1, "SN001")]);
    bus.script(1, CMD_MEASUREMENT, [Reply::ack("23.5")]);
    let recorder = MemoryRecorder::new();
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1], Duration::ZERO, None),
    );

    completed(&mut scheduler).await;
    let report = completed(&mut scheduler).await;

    assert_eq!(report.skipped, vec![1]);
    assert_eq!(report.recorded, 1);
    let readings = recorder.readings();
    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0], readings[1]);
    assert_eq!(scheduler.device(1).unwrap().value(), Some("23.5"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_bytes_flushed_after_open() {
    let bus = SimulatedBus::new();
    bus.leave_stale(&[0x15]);
    healthy(&bus, 1, "SN001", "23.5");
    let recorder = MemoryRecorder::new();
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1], Duration::ZERO, Some(1)),
    );

    let report = completed(&mut scheduler).await;

    assert_eq!(report.polled, vec![1]);
    assert_eq!(scheduler.device(1).unwrap().counters().nak, 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_scanning_when_budget_used() {
    let bus = SimulatedBus::new();
    healthy(&bus, 1, "SN001", "23.5");
    let recorder = MemoryRecorder::new();
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1], Duration::ZERO, Some(2)),
    );

    let idle = tokio::time::timeout(Duration::from_secs(600), scheduler.run()).await;

    assert!(idle.is_err());
    assert_eq!(bus.opens(), 2);
    assert_eq!(recorder.readings().len(), 2);
    assert_eq!(scheduler.remaining_scans(), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_run_retries_after_open_failure() {
    let bus = SimulatedBus::new();
    bus.fail_opens(3);
    healthy(&bus, 1, "SN001", "23.5");
    let recorder = MemoryRecorder::new();
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1], Duration::ZERO, Some(1)),
    );

    let _ = tokio::time::timeout(Duration::from_secs(60), scheduler.run()).await;

    assert_eq!(bus.opens(), 1);
    assert_eq!(recorder.readings().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_address_alias_recorded_once() {
    let bus = SimulatedBus::new();
    healthy(&bus, 1, "SN001", "23.5");
    let recorder = MemoryRecorder::new();
    let mut scheduler = ScanScheduler::new(
        bus.clone(),
        recorder.clone(),
        settings(&[1, 129], Duration::ZERO, Some(1)),
    );

    let report = completed(&mut scheduler).await;

    assert_eq!(report.polled, vec![1]);
    assert_eq!(recorder.readings().len(), 1);
    assert_eq!(scheduler.devices().count(), 1);
}
