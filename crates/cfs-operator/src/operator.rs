//! Daemon assembly: build every component from one `OperatorConfig`, run the
//! startup checks, then hand the long-running loops to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use cfs_client::{CfsClient, ImsClient, RetryPolicy};

use crate::adapters::JobScheduler;
use crate::adapters::kafka::KafkaEventBus;
use crate::adapters::kubernetes::KubernetesScheduler;
use crate::config::OperatorConfig;
use crate::controller::SessionController;
use crate::events::EventIngestor;
use crate::ims_sweeper::ImsSweeper;
use crate::janitor::SessionJanitor;
use crate::job_spec::JobTemplate;
use crate::liveness::{Timestamp, heartbeat};
use crate::logging::{LogHandle, watch_debug_file};
use crate::monitor::JobMonitor;
use crate::options::OptionsCache;
use crate::reconciler::Reconciler;
use crate::shutdown::ShutdownSignal;
use crate::supervisor::Supervisor;

/// Poll the scheduler until it answers. Returns `false` if shutdown was
/// requested first.
pub async fn wait_for_networking(
    scheduler: &dyn JobScheduler,
    interval: Duration,
    shutdown: &mut ShutdownSignal,
) -> bool {
    let mut attempts = 0u32;
    loop {
        match scheduler.ping().await {
            Ok(()) => {
                tracing::info!("scheduler API reachable");
                return true;
            }
            Err(err) => {
                attempts += 1;
                if attempts == 1 || attempts % 60 == 0 {
                    tracing::info!(attempts, %err, "waiting for networking");
                }
            }
        }
        if shutdown.sleep(interval).await {
            return false;
        }
    }
}

/// Keep the liveness timestamp fresh for as long as the supervisor runs.
pub fn spawn_heartbeat(supervisor: &mut Supervisor, timestamp: Timestamp, interval: Duration) {
    supervisor.spawn("heartbeat", move |signal| heartbeat(timestamp.clone(), interval, signal));
}

/// Startup checks: wait for the scheduler, then for a first successful
/// session sync. Returns `false` if shutdown was requested first.
pub async fn startup_checks(
    scheduler: &dyn JobScheduler,
    monitor: &JobMonitor,
    network_wait_interval: Duration,
    shutdown: &mut ShutdownSignal,
) -> bool {
    if !wait_for_networking(scheduler, network_wait_interval, shutdown).await {
        return false;
    }
    monitor.initial_sync(shutdown.clone()).await;
    !shutdown.is_triggered()
}

pub async fn run(config: OperatorConfig, log: LogHandle, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let timings = config.timings.clone();
    let timestamp = Timestamp::new(&config.timestamp_path);
    let mut supervisor = Supervisor::new(shutdown.clone(), timings.restart_delay);
    spawn_heartbeat(&mut supervisor, timestamp.clone(), timings.heartbeat_interval);

    tracing::info!(
        namespace = %config.template.namespace,
        cfs_api = %config.cfs_api_url,
        ims_api = %config.ims_api_url,
        kubernetes_api = %config.kubernetes_api_url,
        kafka = %config.kafka_bootstrap,
        topic = %config.kafka_topic,
        "starting configuration session operator"
    );

    let cfs = Arc::new(CfsClient::new(
        &config.cfs_api_url,
        config.request_timeout,
        RetryPolicy::default(),
    )?);
    let ims = Arc::new(ImsClient::new(
        &config.ims_api_url,
        config.request_timeout,
        RetryPolicy::default(),
    )?);
    let scheduler = Arc::new(KubernetesScheduler::new(
        &config.kubernetes_api_url,
        &config.template.namespace,
        &config.kubernetes_token_path,
        &config.kubernetes_ca_path,
        config.request_timeout,
    )?);

    let monitor = Arc::new(JobMonitor::new(cfs.clone(), scheduler.clone(), timings.clone()));
    if !startup_checks(scheduler.as_ref(), &monitor, timings.network_wait_interval, &mut shutdown).await {
        supervisor.join().await;
        return Ok(());
    }

    let options = Arc::new(OptionsCache::new(cfs.clone()));
    match options.refresh().await {
        Ok(current) => log.set_level(&current.logging_level),
        Err(err) => tracing::warn!(%err, "unable to load service options; using defaults"),
    }

    let controller = Arc::new(SessionController::new(
        cfs.clone(),
        cfs.clone(),
        scheduler.clone(),
        ims.clone(),
        monitor.clone(),
        options.clone(),
        JobTemplate::new(config.template.clone()),
    ));
    let sweeper = Arc::new(ImsSweeper::new(cfs.clone(), ims.clone(), timings.ims_sweep_interval));
    let reconciler = Arc::new(Reconciler::new(
        cfs.clone(),
        scheduler.clone(),
        controller.clone(),
        monitor.clone(),
        timings.reconcile_interval,
    ));
    let janitor = Arc::new(SessionJanitor::new(
        cfs.clone(),
        options.clone(),
        log.clone(),
        timings.janitor_interval,
    ));

    {
        let log = log.clone();
        let path = config.debug_watch_file.clone();
        let interval = timings.debug_watch_interval;
        supervisor.spawn("debug-watch", move |signal| {
            watch_debug_file(log.clone(), path.clone(), interval, signal)
        });
    }
    {
        let janitor = janitor.clone();
        supervisor.spawn("session-cleanup", move |signal| janitor.clone().run(signal));
    }
    {
        let controller = controller.clone();
        let timestamp = timestamp.clone();
        let bootstrap = config.kafka_bootstrap.clone();
        let topic = config.kafka_topic.clone();
        let group = config.kafka_group.clone();
        let pause = timings.event_retry_pause;
        supervisor.spawn("event-ingestor", move |signal| {
            let controller = controller.clone();
            let timestamp = timestamp.clone();
            let (bootstrap, topic, group) = (bootstrap.clone(), topic.clone(), group.clone());
            async move {
                let bus = Arc::new(KafkaEventBus::connect(&bootstrap, &topic, &group)?);
                let ingestor = EventIngestor::new(bus, controller, pause).with_timestamp(timestamp);
                Arc::new(ingestor).run(signal).await
            }
        });
    }
    {
        let monitor = monitor.clone();
        supervisor.spawn("job-monitor", move |signal| monitor.clone().run(signal));
    }
    {
        let monitor = monitor.clone();
        supervisor.spawn("job-cleanup", move |signal| monitor.clone().run_cleanup(signal));
    }
    {
        let sweeper = sweeper.clone();
        supervisor.spawn("ims-cleanup", move |signal| sweeper.clone().run(signal));
    }
    {
        let reconciler = reconciler.clone();
        supervisor.spawn("reconciler", move |signal| reconciler.clone().run(signal));
    }

    tracing::info!(tasks = supervisor.len(), "operator running");
    shutdown.wait().await;
    tracing::info!("shutting down");
    supervisor.join().await;
    Ok(())
}
