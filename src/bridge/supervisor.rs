//! Bridge Supervisor
//!
//! Brings both sides up (platform first, since the secondary may need
//! platform credentials), wires each session's inbound stream into the
//! relay and restarts a side whose session ends. A failing side never stops
//! the other one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::BackoffPolicy;
use super::connection::ConnectionManager;
use super::endpoint::EndpointSource;
use super::ledger::EchoLedger;
use super::link::BrokerLink;
use super::relay::{RelayEngine, RelayStats};
use super::topic_mapper::TopicMapper;
use crate::config::{Config, ConnectionConfig};
use crate::error::ConnectError;
use crate::remote::{RemotePeer, Side};

/// How long a cancelled session gets to send its DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePhase {
    /// Not started, or stopped by shutdown
    Idle,
    /// Resolving the endpoint and performing the MQTT handshake
    Connecting,
    /// Session up and relayed
    Running,
    /// Session lost or attempt failed; waiting to reconnect
    Recovering,
}

/// One established session with its relay flow
struct Established {
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
    flow: JoinHandle<()>,
}

struct SideHandle {
    source: Arc<dyn EndpointSource>,
    link: Arc<BrokerLink>,
    phase: watch::Sender<SidePhase>,
}

impl SideHandle {
    fn new(source: Arc<dyn EndpointSource>) -> Self {
        let (phase, _) = watch::channel(SidePhase::Idle);
        Self {
            link: Arc::new(BrokerLink::new(source.side())),
            source,
            phase,
        }
    }
}

pub struct BridgeSupervisor {
    settings: ConnectionConfig,
    backoff: BackoffPolicy,
    ledger: Arc<EchoLedger>,
    relay: Arc<RelayEngine>,
    platform: SideHandle,
    secondary: SideHandle,
}

impl BridgeSupervisor {
    pub fn new(
        config: &Config,
        mapper: TopicMapper,
        platform: Arc<dyn EndpointSource>,
        secondary: Arc<dyn EndpointSource>,
    ) -> Self {
        let platform = SideHandle::new(platform);
        let secondary = SideHandle::new(secondary);
        let ledger = Arc::new(EchoLedger::new());
        let relay = Arc::new(RelayEngine::new(
            ledger.clone(),
            mapper,
            platform.link.clone() as Arc<dyn RemotePeer>,
            secondary.link.clone() as Arc<dyn RemotePeer>,
        ));

        Self {
            settings: config.connection.clone(),
            backoff: BackoffPolicy::new(&config.backoff),
            ledger,
            relay,
            platform,
            secondary,
        }
    }

    fn handle(&self, side: Side) -> &SideHandle {
        match side {
            Side::Platform => &self.platform,
            Side::Secondary => &self.secondary,
        }
    }

    pub fn phase(&self, side: Side) -> SidePhase {
        *self.handle(side).phase.borrow()
    }

    /// Observe phase changes of one side
    pub fn watch_phase(&self, side: Side) -> watch::Receiver<SidePhase> {
        self.handle(side).phase.subscribe()
    }

    pub fn link(&self, side: Side) -> &Arc<BrokerLink> {
        &self.handle(side).link
    }

    pub fn ledger(&self) -> &Arc<EchoLedger> {
        &self.ledger
    }

    pub fn stats(&self) -> RelayStats {
        self.relay.stats()
    }

    /// Run the bridge until `shutdown` is cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> RelayStats {
        info!("Bridge: Starting");

        let Some(platform) = self.establish(Side::Platform, &shutdown, 0).await else {
            return self.stopped();
        };
        let platform_task = tokio::spawn(self.clone().supervise(
            Side::Platform,
            platform,
            shutdown.clone(),
        ));

        let secondary_task = match self.establish(Side::Secondary, &shutdown, 0).await {
            Some(secondary) => Some(tokio::spawn(self.clone().supervise(
                Side::Secondary,
                secondary,
                shutdown.clone(),
            ))),
            None => None,
        };

        if let Err(e) = platform_task.await {
            error!("Bridge: platform supervisor failed: {}", e);
        }
        if let Some(task) = secondary_task {
            if let Err(e) = task.await {
                error!("Bridge: secondary supervisor failed: {}", e);
            }
        }

        self.stopped()
    }

    fn stopped(&self) -> RelayStats {
        let stats = self.stats();
        info!(
            "Bridge: Stopped (platform: {} forwarded, {} dropped; secondary: {} forwarded, {} suppressed, {} dropped)",
            stats.platform_forwarded,
            stats.platform_dropped,
            stats.secondary_forwarded,
            stats.secondary_suppressed,
            stats.secondary_dropped
        );
        stats
    }

    /// Keep one side running, reconnecting whenever its session ends
    async fn supervise(self: Arc<Self>, side: Side, mut current: Established, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.teardown(side, current).await;
                    self.handle(side).phase.send_replace(SidePhase::Idle);
                    return;
                }
                state = current.manager.closed() => {
                    warn!("{} broker: Session ended ({}), reconnecting", side, state);
                }
            }

            self.teardown(side, current).await;
            self.handle(side).phase.send_replace(SidePhase::Recovering);

            let delay = self.backoff.delay(0);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.handle(side).phase.send_replace(SidePhase::Idle);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // The pause above was retry 0
            current = match self.establish(side, &shutdown, 1).await {
                Some(established) => established,
                None => return,
            };
        }
    }

    /// Connect one side, retrying with backoff until success or shutdown
    ///
    /// `first_retry` is the backoff step used after the first failed attempt.
    async fn establish(
        &self,
        side: Side,
        shutdown: &CancellationToken,
        first_retry: u32,
    ) -> Option<Established> {
        let handle = self.handle(side);
        let mut failures: u32 = 0;

        loop {
            handle.phase.send_replace(SidePhase::Connecting);

            let result = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = self.connect_once(side, shutdown) => Some(result),
            };

            match result {
                None => {
                    handle.phase.send_replace(SidePhase::Idle);
                    return None;
                }
                Some(Ok(established)) => {
                    handle.link.install(established.manager.clone());
                    handle.phase.send_replace(SidePhase::Running);
                    info!("{} broker: Bridge side running", side);
                    return Some(established);
                }
                Some(Err(e)) => {
                    let delay = self.backoff.delay(first_retry.saturating_add(failures));
                    failures = failures.saturating_add(1);
                    warn!(
                        "{} broker: Connect attempt {} failed: {}, retrying in {:?}",
                        side, failures, e, delay
                    );
                    handle.phase.send_replace(SidePhase::Recovering);

                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            handle.phase.send_replace(SidePhase::Idle);
                            return None;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_once(&self, side: Side, shutdown: &CancellationToken) -> Result<Established, ConnectError> {
        let endpoint = self.handle(side).source.resolve().await?;
        let cancel = shutdown.child_token();
        let (manager, inbound) =
            ConnectionManager::connect(side, &endpoint, &self.settings, cancel.clone()).await?;

        let flow = tokio::spawn(self.relay.clone().run_flow(side, inbound, cancel.clone()));
        Ok(Established {
            manager: Arc::new(manager),
            cancel,
            flow,
        })
    }

    async fn teardown(&self, side: Side, established: Established) {
        let handle = self.handle(side);
        handle.link.clear();
        established.cancel.cancel();

        if tokio::time::timeout(DISCONNECT_GRACE, established.manager.closed())
            .await
            .is_err()
        {
            warn!("{} broker: Session did not close in time", side);
        }
        if let Err(e) = established.flow.await {
            error!("{} broker: Relay flow failed: {}", side, e);
        }

        // Forwards into the ended secondary session can no longer echo back
        if side == Side::Secondary {
            let stranded = self.ledger.clear();
            if stranded > 0 {
                info!("Bridge: Discarded {} pending echo entries", stranded);
            }
        }
    }
}
