// Supervisor actor tests: tracking, attach/detach, status handling, retries, toggles, broadcast

mod common;

use common::*;
use kernelmon::kernel::KernelStatus;
use kernelmon::models::{
    FromClientMessage, MetricKey, MetricKind, Settings, ToClientMessage, align_to_second, now_ms,
};
use kernelmon::supervisor::MonitorState;
use kernelmon::workspace::{HostEvent, NotebookDocument};
use std::time::Duration;

fn open(path: &str) -> HostEvent {
    HostEvent::NotebookOpened(NotebookDocument::new(path, "jupyter-notebook"))
}

/// Supervisor with one visible client and a started monitor for `NOTEBOOK` (kernel pid 4242).
async fn started() -> (
    TestSupervisor,
    std::sync::Arc<FakeKernel>,
    u64,
    tokio::sync::mpsc::Receiver<ToClientMessage>,
) {
    let sup = spawn_supervisor(Settings::default(), None);
    let kernel = FakeKernel::python("k1", Some(4242));
    sup.runtime.set_kernel(NOTEBOOK, kernel.clone());
    let (id, rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle.host_event(open(NOTEBOOK));
    sup.handle
        .host_event(HostEvent::ActiveNotebookChanged(Some(NOTEBOOK.to_string())));
    wait_for_monitors(&sup.handle, |m| {
        m.len() == 1 && m[0].state == MonitorState::Started
    })
    .await;
    (sup, kernel, id, rx)
}

#[tokio::test(start_paused = true)]
async fn test_new_client_gets_settings_then_host_heartbeat() {
    let sup = spawn_supervisor(Settings::default(), None);
    let (_id, mut rx) = sup.handle.register_client(true).await.unwrap();

    match recv(&mut rx).await {
        ToClientMessage::UpdateSettings { settings } => {
            assert_eq!(settings.enabled_metrics, vec![MetricKey::host(MetricKind::Cpu)]);
            assert!(settings.monitoring_notebooks.is_empty());
        }
        other => panic!("expected settings first, got {:?}", other),
    }

    let data = next_batch(&mut rx).await;
    assert_eq!(data.len(), 1);
    assert!(data[0].is_host_only());
    assert_eq!(data[0].timestamp % 1000, 0);
    let cpu = data[0].cpu.unwrap();
    assert!((cpu.system - 0.25).abs() < 1e-9);
    let memory = data[0].memory.unwrap();
    assert_eq!(memory.total, 16_000_000_000);
    assert_eq!(memory.system, 4_000_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_every_tick_without_monitors() {
    let sup = spawn_supervisor(Settings::default(), None);
    let (_id, mut rx) = sup.handle.register_client(true).await.unwrap();
    for _ in 0..3 {
        let data = next_batch(&mut rx).await;
        assert_eq!(data.len(), 1);
        assert!(data[0].is_host_only());
    }
}

#[tokio::test(start_paused = true)]
async fn test_hidden_client_gets_no_broadcasts() {
    let sup = spawn_supervisor(Settings::default(), None);
    let (_id, mut rx) = sup.handle.register_client(false).await.unwrap();
    assert!(matches!(
        recv(&mut rx).await,
        ToClientMessage::UpdateSettings { .. }
    ));
    let next = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;
    assert!(next.is_err(), "hidden client received {:?}", next);
}

#[tokio::test(start_paused = true)]
async fn test_open_notebook_attaches_sampler() {
    let (sup, kernel, _id, _rx) = started().await;
    let monitors = sup.handle.monitors().await;
    assert_eq!(monitors[0].notebook, NOTEBOOK);
    assert_eq!(monitors[0].kernel_pid, Some(4242));
    assert_eq!(kernel.execution_count(), 1);
    assert_eq!(sup.launcher.attach_count(), 1);
    let attaches = sup.launcher.attaches.lock().unwrap();
    assert_eq!(attaches[0].subject, NOTEBOOK);
    assert_eq!(attaches[0].pid, 4242);
}

#[tokio::test(start_paused = true)]
async fn test_first_sample_adds_monitoring_then_broadcasts_it() {
    let (sup, _kernel, _id, mut rx) = started().await;
    let timestamp = align_to_second(now_ms());
    sup.samples_tx
        .send(kernel_sample(NOTEBOOK, timestamp, 0.5, 1_000))
        .unwrap();

    let settings = next_settings(&mut rx, |s| !s.monitoring_notebooks.is_empty()).await;
    assert_eq!(settings.monitoring_notebooks, vec![NOTEBOOK.to_string()]);
    assert!(settings.is_enabled(&MetricKey::new(MetricKind::Cpu, NOTEBOOK)));
    assert!(settings.is_enabled(&MetricKey::new(MetricKind::Memory, NOTEBOOK)));
    assert!(settings.is_enabled(&MetricKey::host(MetricKind::Cpu)));

    let data = next_batch(&mut rx).await;
    let sample = data
        .iter()
        .find(|s| s.notebook == NOTEBOOK)
        .expect("notebook sample in batch");
    assert_eq!(sample.timestamp, timestamp);
    assert_eq!(sample.memory.unwrap().kernel, 1_000);
}

// Real time: the heartbeat delay for supervised notebooks follows the wall clock.
#[tokio::test]
async fn test_monitored_notebook_is_gap_filled_from_last_reading() {
    let (sup, _kernel, _id, mut rx) = started().await;
    {
        let attaches = sup.launcher.attaches.lock().unwrap();
        let mut reading = attaches[0].reading.lock().unwrap();
        reading.cpu_fraction = 0.3;
        reading.memory_bytes = 2_048;
    }
    sup.samples_tx
        .send(kernel_sample(NOTEBOOK, align_to_second(now_ms()), 0.3, 2_048))
        .unwrap();
    next_settings(&mut rx, |s| !s.monitoring_notebooks.is_empty()).await;
    next_batch(&mut rx).await;

    // No fresh samples: the heartbeat carries a placeholder with the cached reading.
    let data = next_batch(&mut rx).await;
    let host = data.iter().find(|s| s.is_host_only()).expect("heartbeat");
    let fill = data
        .iter()
        .find(|s| s.notebook == NOTEBOOK)
        .expect("gap-fill");
    assert_eq!(fill.timestamp, host.timestamp);
    assert_eq!(fill.memory.unwrap().kernel, 2_048);
    assert_eq!(fill.memory.unwrap().total, 0);
    assert_eq!(fill.cpu.unwrap().system, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_dead_kernel_stops_monitor_and_idle_restarts_once() {
    let (sup, kernel, _id, _rx) = started().await;

    kernel.send_status(KernelStatus::Dead);
    let monitors = wait_for_monitors(&sup.handle, |m| m[0].state == MonitorState::Stopped).await;
    assert_eq!(monitors[0].kernel_pid, None);
    assert!(sup.launcher.is_killed(0));

    kernel.send_status(KernelStatus::Idle);
    kernel.send_status(KernelStatus::Idle);
    wait_for_monitors(&sup.handle, |m| m[0].state == MonitorState::Started).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(kernel.execution_count(), 2);
    assert_eq!(sup.launcher.attach_count(), 2);

    kernel.send_status(KernelStatus::Busy);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(kernel.execution_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restarting_kernel_detaches_sampler() {
    let (sup, kernel, _id, _rx) = started().await;
    kernel.send_status(KernelStatus::Restarting);
    wait_for_monitors(&sup.handle, |m| m[0].state == MonitorState::Stopped).await;
    assert!(sup.launcher.is_killed(0));
}

#[tokio::test(start_paused = true)]
async fn test_non_jupyter_notebook_is_not_tracked() {
    let sup = spawn_supervisor(Settings::default(), None);
    sup.runtime
        .set_kernel("/work/notes.md", FakeKernel::python("k1", Some(1)));
    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle.host_event(HostEvent::NotebookOpened(NotebookDocument::new(
        "/work/notes.md",
        "markdown-notebook",
    )));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sup.handle.monitors().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_python_kernel_is_not_attached() {
    let sup = spawn_supervisor(Settings::default(), None);
    let kernel = FakeKernel::with_language("k1", "r", Some(1));
    sup.runtime.set_kernel(NOTEBOOK, kernel.clone());
    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle.host_event(open(NOTEBOOK));
    wait_for_monitors(&sup.handle, |m| {
        m.len() == 1 && m[0].state == MonitorState::Stopped
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(kernel.execution_count(), 0);
    assert_eq!(sup.launcher.attach_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tracking_waits_for_a_client_and_the_active_notebook() {
    let sup = spawn_supervisor(Settings::default(), None);
    sup.runtime
        .set_kernel(NOTEBOOK, FakeKernel::python("k1", Some(7)));
    sup.handle.host_event(open(NOTEBOOK));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sup.handle.monitors().await.is_empty());

    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sup.handle.monitors().await.is_empty());

    sup.handle
        .host_event(HostEvent::ActiveNotebookChanged(Some(NOTEBOOK.to_string())));
    wait_for_monitors(&sup.handle, |m| {
        m.len() == 1 && m[0].state == MonitorState::Started
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_hiding_every_client_stops_tracking_and_showing_resumes() {
    let (sup, _kernel, id, _rx) = started().await;

    sup.handle
        .client_message(id, FromClientMessage::SetVisibility { visible: false });
    wait_for_monitors(&sup.handle, |m| m.is_empty()).await;
    assert!(sup.launcher.is_killed(0));

    sup.handle
        .client_message(id, FromClientMessage::SetVisibility { visible: true });
    wait_for_monitors(&sup.handle, |m| {
        m.len() == 1 && m[0].state == MonitorState::Started
    })
    .await;
    assert_eq!(sup.launcher.attach_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_closing_notebook_drops_its_metrics() {
    let (sup, _kernel, _id, mut rx) = started().await;
    sup.samples_tx
        .send(kernel_sample(NOTEBOOK, align_to_second(now_ms()), 0.1, 10))
        .unwrap();
    next_settings(&mut rx, |s| !s.monitoring_notebooks.is_empty()).await;

    sup.handle
        .host_event(HostEvent::NotebookClosed(NOTEBOOK.to_string()));
    let settings = next_settings(&mut rx, |s| s.monitoring_notebooks.is_empty()).await;
    assert_eq!(settings.enabled_metrics, vec![MetricKey::host(MetricKind::Cpu)]);
    assert!(sup.handle.monitors().await.is_empty());
    assert!(sup.launcher.is_killed(0));
}

#[tokio::test(start_paused = true)]
async fn test_change_retries_until_started() {
    let sup = spawn_supervisor(Settings::default(), None);
    let kernel = FakeKernel::python("k1", None);
    sup.runtime.set_kernel(NOTEBOOK, kernel.clone());
    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle.host_event(open(NOTEBOOK));
    eventually(|| kernel.execution_count() == 1).await;

    // A failed attempt on open schedules nothing.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(kernel.execution_count(), 1);

    sup.handle
        .host_event(HostEvent::NotebookChanged(NOTEBOOK.to_string()));
    eventually(|| kernel.execution_count() == 2).await;
    kernel.set_pid(Some(99));

    wait_for_monitors(&sup.handle, |m| m[0].state == MonitorState::Started).await;
    assert_eq!(kernel.execution_count(), 3);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(kernel.execution_count(), 3);
    assert_eq!(sup.launcher.attach_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sampler_spawn_leaves_monitor_stopped() {
    let sup = spawn_supervisor(Settings::default(), None);
    sup.launcher
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);
    sup.runtime
        .set_kernel(NOTEBOOK, FakeKernel::python("k1", Some(5)));
    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle.host_event(open(NOTEBOOK));
    let monitors = wait_for_monitors(&sup.handle, |m| {
        m.len() == 1 && m[0].state == MonitorState::Stopped
    })
    .await;
    assert_eq!(monitors[0].kernel_pid, None);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_memory_stashes_and_restores_lane_keys() {
    let (sup, _kernel, _id, mut rx) = started().await;
    sup.samples_tx
        .send(kernel_sample(NOTEBOOK, align_to_second(now_ms()), 0.1, 10))
        .unwrap();
    next_settings(&mut rx, |s| !s.monitoring_notebooks.is_empty()).await;

    sup.handle.toggle(MetricKind::Memory);
    let settings = next_settings(&mut rx, |s| !s.show_memory).await;
    assert!(settings.show_cpu);
    assert!(
        settings
            .enabled_metrics
            .iter()
            .all(|k| k.kind == MetricKind::Cpu)
    );
    assert_eq!(settings.monitoring_notebooks, vec![NOTEBOOK.to_string()]);

    sup.handle.toggle(MetricKind::Memory);
    let settings = next_settings(&mut rx, |s| s.show_memory).await;
    assert!(settings.is_enabled(&MetricKey::new(MetricKind::Memory, NOTEBOOK)));
    assert!(settings.is_enabled(&MetricKey::new(MetricKind::Cpu, NOTEBOOK)));
}

#[tokio::test(start_paused = true)]
async fn test_hidden_lane_at_startup_is_restored_by_toggle() {
    let initial = Settings {
        show_cpu: false,
        ..Settings::default()
    };
    let sup = spawn_supervisor(initial, None);
    let settings = sup.handle.settings().await.unwrap();
    assert!(settings.enabled_metrics.is_empty());

    sup.handle.toggle(MetricKind::Cpu);
    let settings = wait_for_settings(&sup.handle, |s| s.show_cpu).await;
    assert_eq!(settings.enabled_metrics, vec![MetricKey::host(MetricKind::Cpu)]);
}

#[tokio::test(start_paused = true)]
async fn test_set_enabled_metrics_dedupes_and_respects_hidden_lanes() {
    let initial = Settings {
        show_memory: false,
        ..Settings::default()
    };
    let sup = spawn_supervisor(initial, None);
    let (id, _rx) = sup.handle.register_client(true).await.unwrap();
    let host_cpu = MetricKey::host(MetricKind::Cpu);
    let host_memory = MetricKey::host(MetricKind::Memory);
    sup.handle.client_message(
        id,
        FromClientMessage::SetEnabledMetrics {
            keys: vec![host_cpu.clone(), host_cpu.clone(), host_memory.clone()],
        },
    );
    let settings = wait_for_settings(&sup.handle, |s| s.enabled_metrics.len() == 1).await;
    assert_eq!(settings.enabled_metrics, vec![host_cpu.clone()]);

    sup.handle.toggle(MetricKind::Memory);
    let settings = wait_for_settings(&sup.handle, |s| s.show_memory).await;
    assert_eq!(settings.enabled_metrics, vec![host_cpu, host_memory]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_samplers_and_closes_client_queues() {
    let (mut sup, _kernel, _id, mut rx) = started().await;
    sup.shutdown_tx.take().unwrap().send(()).unwrap();
    (&mut sup.task).await.unwrap();
    assert!(sup.launcher.is_killed(0));
    while rx.recv().await.is_some() {}
    assert!(sup.handle.settings().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restart_during_pending_attach_still_reattaches() {
    let (sup, kernel, _id, _rx) = started().await;

    kernel.set_pid(Some(4343));
    kernel.hold_next_execution();
    kernel.send_status(KernelStatus::Restarting);
    kernel.send_status(KernelStatus::Idle);
    eventually(|| kernel.execution_count() == 2).await;

    // Second restart while that introspection is still waiting on the old process.
    kernel.send_status(KernelStatus::Restarting);
    kernel.send_status(KernelStatus::Idle);
    let monitors = wait_for_monitors(&sup.handle, |m| {
        m[0].state == MonitorState::Started && m[0].kernel_pid == Some(4343)
    })
    .await;
    assert_eq!(monitors.len(), 1);
    assert_eq!(kernel.execution_count(), 3);
    assert_eq!(sup.launcher.attach_count(), 2);
    assert!(sup.launcher.is_killed(0));

    // The held attempt times out later and must not disturb the new sampler.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let monitors = sup.handle.monitors().await;
    assert_eq!(monitors[0].state, MonitorState::Started);
    assert_eq!(monitors[0].kernel_pid, Some(4343));
    assert!(!sup.launcher.is_killed(1));
}

#[tokio::test(start_paused = true)]
async fn test_kernel_swap_moves_sampler_to_new_kernel() {
    let (sup, old_kernel, _id, _rx) = started().await;

    let new_kernel = FakeKernel::python("k2", Some(5151));
    sup.runtime.set_kernel(NOTEBOOK, new_kernel.clone());
    sup.handle
        .host_event(HostEvent::KernelChanged(NOTEBOOK.to_string()));
    wait_for_monitors(&sup.handle, |m| {
        m[0].state == MonitorState::Started && m[0].kernel_pid == Some(5151)
    })
    .await;
    assert!(sup.launcher.is_killed(0));
    assert_eq!(sup.launcher.attach_count(), 2);

    // The replaced kernel is no longer listened to.
    old_kernel.send_status(KernelStatus::Dead);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        sup.handle.monitors().await[0].state,
        MonitorState::Started
    );
    assert!(!sup.launcher.is_killed(1));

    new_kernel.send_status(KernelStatus::Dead);
    wait_for_monitors(&sup.handle, |m| m[0].state == MonitorState::Stopped).await;
    assert!(sup.launcher.is_killed(1));
}

#[tokio::test(start_paused = true)]
async fn test_kernel_change_during_pending_attach_uses_new_kernel() {
    let sup = spawn_supervisor(Settings::default(), None);
    let old_kernel = FakeKernel::python("k1", Some(100));
    old_kernel.hold_next_execution();
    sup.runtime.set_kernel(NOTEBOOK, old_kernel.clone());
    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle.host_event(open(NOTEBOOK));
    eventually(|| old_kernel.execution_count() == 1).await;

    sup.runtime
        .set_kernel(NOTEBOOK, FakeKernel::python("k2", Some(200)));
    sup.handle
        .host_event(HostEvent::KernelChanged(NOTEBOOK.to_string()));
    wait_for_monitors(&sup.handle, |m| {
        m.len() == 1 && m[0].state == MonitorState::Started && m[0].kernel_pid == Some(200)
    })
    .await;
    assert_eq!(sup.launcher.attach_count(), 1);

    // Once the held introspection times out, the old kernel still has no say.
    tokio::time::sleep(Duration::from_secs(5)).await;
    old_kernel.send_status(KernelStatus::Dead);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let monitors = sup.handle.monitors().await;
    assert_eq!(monitors[0].state, MonitorState::Started);
    assert_eq!(monitors[0].kernel_pid, Some(200));
    assert!(!sup.launcher.is_killed(0));
}

#[tokio::test(start_paused = true)]
async fn test_kernel_change_for_untracked_notebook_is_ignored() {
    let sup = spawn_supervisor(Settings::default(), None);
    let (_id, _rx) = sup.handle.register_client(true).await.unwrap();
    sup.handle
        .host_event(HostEvent::KernelChanged(NOTEBOOK.to_string()));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sup.handle.monitors().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_headless_client_does_not_keep_sampling_alive() {
    let (sup, _kernel, id, _rx) = started().await;
    let (_headless, mut headless_rx) = sup.handle.register_headless_client().await.unwrap();

    sup.handle
        .client_message(id, FromClientMessage::SetVisibility { visible: false });
    wait_for_monitors(&sup.handle, |m| m.is_empty()).await;
    assert!(sup.launcher.is_killed(0));

    // It still receives broadcasts while nobody is looking.
    let data = next_batch(&mut headless_rx).await;
    assert!(data[0].is_host_only());
}

#[tokio::test(start_paused = true)]
async fn test_headless_client_alone_does_not_track_notebooks() {
    let sup = spawn_supervisor(Settings::default(), None);
    sup.runtime
        .set_kernel(NOTEBOOK, FakeKernel::python("k1", Some(7)));
    let (_id, _rx) = sup.handle.register_headless_client().await.unwrap();
    sup.handle.host_event(open(NOTEBOOK));
    sup.handle
        .host_event(HostEvent::ActiveNotebookChanged(Some(NOTEBOOK.to_string())));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sup.handle.monitors().await.is_empty());
    assert_eq!(sup.launcher.attach_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_preview_running_does_not_block_pause() {
    let (sup, _kernel, id, _rx) = started().await;
    let (preview, _task) = kernelmon::client::preview::spawn(
        sup.handle.clone(),
        kernelmon::client::PreviewConfig {
            width: 400.0,
            height: 300.0,
        },
    );
    assert!(preview.render().await.is_some());

    sup.handle
        .client_message(id, FromClientMessage::SetVisibility { visible: false });
    wait_for_monitors(&sup.handle, |m| m.is_empty()).await;
    assert!(sup.launcher.is_killed(0));
}
