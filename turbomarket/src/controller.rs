use std::sync::Arc;

use tokio::sync::broadcast;
use turbomarket_analytics::EventSink;
use turbomarket_common::{Signal, internal, logging, tracing};
use turbomarket_content::{ContentComposer, DryRunGenerator};
use turbomarket_gateway::{DeliveryGateway, DryRunGateway};
use turbomarket_health::{HealthChecker, HealthServer};
use turbomarket_queue::JobQueues;
use turbomarket_tracing::traced;
use turbomarket_worker::{Collaborators, Dispatcher};

use crate::Config;

/// Owns the configuration and wires every component to one shutdown channel
#[derive(Debug)]
pub struct Controller {
    config: Config,
    shutdown: broadcast::Sender<Signal>,
}

impl Controller {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (shutdown, _receiver) = broadcast::channel(64);
        Self { config, shutdown }
    }

    /// A sender on the channel every component listens to
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<Signal> {
        self.shutdown.clone()
    }

    /// Run the worker, the health monitor and the HTTP server until
    /// SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the job store, the analytics recorder or the HTTP
    /// listener cannot be set up, or if the dispatcher stops on an error.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let signals = tokio::spawn(shutdown_on_signal(self.shutdown.clone()));
        let result = self.serve().await;
        signals.abort();

        result
    }

    /// Everything [`Controller::run`] does except logging setup and OS
    /// signal handling; stops once [`Signal::Shutdown`] is sent on
    /// [`Controller::shutdown_handle`]
    ///
    /// # Errors
    ///
    /// See [`Controller::run`]
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self { config, shutdown } = self;
        let names = config.queue_names();

        let store = config.store.into_store()?;
        let queues = JobQueues::new(store, config.queue);
        let restored = queues.restore(&names).await?;
        internal!(level = INFO, "Restored {restored} jobs across {names:?}");

        // The sink outlives the dispatcher so events from jobs finishing
        // during shutdown are still recorded
        let (finalise, _receiver) = broadcast::channel(1);
        let recorder = config.analytics.recorder().await?;
        let (events, sink) = EventSink::spawn(
            recorder,
            config.analytics.channel_capacity,
            finalise.subscribe(),
        );

        let gateway: Arc<dyn DeliveryGateway> = Arc::new(DryRunGateway::new());
        let composer = ContentComposer::with_config(Arc::new(DryRunGenerator), config.content);

        let dispatcher = Dispatcher::new(
            config.worker,
            queues.clone(),
            Collaborators {
                composer,
                gateway,
                events: events.clone(),
            },
        );

        let checker = Arc::new(HealthChecker::new(
            queues,
            names,
            events,
            dispatcher.running_flag(),
            config.health.max_pending,
        ));

        let server = if config.health.enabled {
            Some(HealthServer::new(&config.health, Arc::clone(&checker)).await?)
        } else {
            internal!(level = INFO, "Health server disabled");
            None
        };

        let worker_shutdown = shutdown.subscribe();
        let monitor_shutdown = shutdown.subscribe();
        let server_shutdown = shutdown.subscribe();

        internal!(level = INFO, "Controller running");

        let worker = async {
            let result = dispatcher.serve(worker_shutdown).await;
            if result.is_err() {
                let _ = shutdown.send(Signal::Shutdown);
            }
            result
        };

        let http = async {
            match server {
                Some(server) => {
                    let result = server.serve(server_shutdown).await;
                    if result.is_err() {
                        let _ = shutdown.send(Signal::Shutdown);
                    }
                    result
                }
                None => Ok(()),
            }
        };

        let (worker, http, ()) = tokio::join!(
            worker,
            http,
            checker.monitor(config.health.interval(), monitor_shutdown)
        );

        let _ = finalise.send(Signal::Shutdown);
        if let Err(err) = sink.await {
            tracing::warn!("Analytics sink ended abnormally: {err}");
        }

        internal!(level = INFO, "Shutting down...");

        worker?;
        http?;
        Ok(())
    }
}

/// Broadcast [`Signal::Shutdown`] on the first SIGINT or SIGTERM; a second
/// CTRL+C exits immediately
#[traced(instrument(level = tracing::Level::TRACE, skip_all))]
async fn shutdown_on_signal(sender: broadcast::Sender<Signal>) -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    if sender.send(Signal::Shutdown).is_err() {
        tracing::debug!("No components left to notify of shutdown");
    }

    tokio::signal::ctrl_c().await?;
    tracing::warn!("Second CTRL+C, exiting without waiting for in-flight jobs");
    std::process::exit(130);
}
