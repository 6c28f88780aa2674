// Tick scheduler tests: heartbeat synthesis, hysteresis and gap-fill

mod common;

use common::{host_sample, kernel_sample};
use kernelmon::host_info::HostSnapshot;
use kernelmon::sampler::KernelReading;
use kernelmon::supervisor::{MonitoredSubject, TickScheduler};

const T0: u64 = 1_700_000_000_000;

fn host() -> HostSnapshot {
    HostSnapshot {
        cpu_percent: 50.0,
        total_memory: 8_000,
        free_memory: 6_000,
    }
}

fn monitored(notebook: &str, cpu: f64, memory: u64) -> MonitoredSubject {
    MonitoredSubject {
        notebook: notebook.to_string(),
        reading: KernelReading {
            cpu_fraction: cpu,
            memory_bytes: memory,
        },
    }
}

#[test]
fn test_heartbeat_every_tick_without_supervised_notebooks() {
    let mut scheduler = TickScheduler::new();
    for i in 0..3 {
        let now = T0 + i * 1_000 + 250;
        let batch = scheduler
            .tick(now, Vec::new(), false, &[], &host())
            .expect("heartbeat");
        assert_eq!(batch.len(), 1);
        let sample = &batch[0];
        assert!(sample.is_host_only());
        assert_eq!(sample.timestamp, T0 + i * 1_000 - 1_000);
        assert_eq!(sample.cpu.unwrap().system, 0.5);
        assert_eq!(sample.memory.unwrap().system, 2_000);
        assert_eq!(sample.memory.unwrap().total, 8_000);
    }
    assert_eq!(scheduler.last_emitted_at(), 0);
}

#[test]
fn test_real_data_is_forwarded_and_advances_last_emitted() {
    let mut scheduler = TickScheduler::new();
    let sample = kernel_sample("a.ipynb", T0, 0.2, 100);
    let batch = scheduler
        .tick(T0 + 10, vec![sample.clone()], true, &[], &host())
        .unwrap();
    assert_eq!(batch, vec![sample]);
    assert_eq!(scheduler.last_emitted_at(), T0);
}

#[test]
fn test_supervised_heartbeat_waits_a_second_after_real_data() {
    let mut scheduler = TickScheduler::new();
    scheduler
        .tick(T0, vec![kernel_sample("a.ipynb", T0, 0.2, 100)], true, &[], &host())
        .unwrap();
    // Same second, nothing new: nothing to send.
    assert!(scheduler.tick(T0 + 900, Vec::new(), true, &[], &host()).is_none());
    let batch = scheduler
        .tick(T0 + 1_000, Vec::new(), true, &[], &host())
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert!(batch[0].is_host_only());
}

#[test]
fn test_gap_fill_for_silent_monitored_notebooks_without_advancing() {
    let mut scheduler = TickScheduler::new();
    let subjects = [monitored("a.ipynb", 0.4, 4_096)];
    scheduler
        .tick(T0, vec![kernel_sample("a.ipynb", T0, 0.4, 4_096)], true, &subjects, &host())
        .unwrap();

    for i in 1..=3 {
        let now = T0 + i * 1_000;
        let batch = scheduler
            .tick(now, Vec::new(), true, &subjects, &host())
            .expect("heartbeat");
        assert_eq!(batch.len(), 2);
        let heartbeat = &batch[0];
        let fill = &batch[1];
        assert!(heartbeat.is_host_only());
        assert_eq!(fill.notebook, "a.ipynb");
        assert_eq!(fill.timestamp, heartbeat.timestamp);
        assert_eq!(fill.cpu.unwrap().kernel, 0.4);
        assert_eq!(fill.cpu.unwrap().system, 0.0);
        assert_eq!(fill.memory.unwrap().kernel, 4_096);
        assert_eq!(fill.memory.unwrap().total, 0);
        assert_eq!(scheduler.last_emitted_at(), T0);
    }
}

#[test]
fn test_gap_fill_once_per_distinct_timestamp() {
    let mut scheduler = TickScheduler::new();
    let subjects = [monitored("a.ipynb", 0.1, 1), monitored("b.ipynb", 0.2, 2)];
    let batch = vec![
        kernel_sample("a.ipynb", T0, 0.1, 1),
        host_sample(T0, 0.3),
        kernel_sample("a.ipynb", T0 + 1_000, 0.1, 1),
    ];
    let out = scheduler
        .tick(T0 + 1_200, batch, true, &subjects, &host())
        .unwrap();
    let fills: Vec<_> = out.iter().filter(|s| s.notebook == "b.ipynb").collect();
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].timestamp, T0);
    assert_eq!(fills[1].timestamp, T0 + 1_000);
    assert!(out.iter().filter(|s| s.notebook == "a.ipynb").count() == 2);
}
