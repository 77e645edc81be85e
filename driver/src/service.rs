//! The driver service.
//!
//! Wires the listener, the dispatcher event loop, and the periodic
//! expiration/liveness sweep together. `start` returns a handle exposing
//! the dispatcher and the management facade; everything else runs on
//! spawned tasks.

use {
    crate::{
        config::DriverConfig,
        dispatcher::Dispatcher,
        error::Result,
        management::DriverManagement,
    },
    log::info,
    std::{net::SocketAddr, sync::Arc, time::Duration},
    taskgrid_net::NetServer,
};

/// How often the expiration/liveness sweep runs.
const SWEEP_INTERVAL_MS: u64 = 250;

/// A running driver.
pub struct DriverHandle {
    /// The dispatch core.
    pub dispatcher: Arc<Dispatcher>,
    /// The management facade.
    pub management: DriverManagement,
    /// Address nodes connect to.
    pub local_addr: SocketAddr,
}

/// The coordinator process entry point.
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    /// Create a driver with the given configuration.
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Bind the listener and start the event and sweep loops.
    pub async fn start(self) -> Result<DriverHandle> {
        let net = NetServer::new(self.config.net.clone()).start().await?;
        let local_addr = net.local_addr;
        info!("taskgrid driver accepting nodes on {}", local_addr);

        let dispatcher = Arc::new(Dispatcher::new(self.config));
        let management = DriverManagement::new(Arc::clone(&dispatcher));

        // Event loop: every channel event funnels through the dispatcher.
        {
            let dispatcher = Arc::clone(&dispatcher);
            let mut events = net.events;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    dispatcher.handle_event(event);
                }
                info!("driver event loop stopped");
            });
        }

        // Periodic sweep: expired dispatches and stale nodes.
        {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
                loop {
                    tick.tick().await;
                    for bundle_id in dispatcher.expired_bundles() {
                        dispatcher.expire_bundle(bundle_id);
                    }
                    dispatcher.evict_stale_nodes();
                }
            });
        }

        Ok(DriverHandle {
            dispatcher,
            management,
            local_addr,
        })
    }
}
