//! Agent daemon: connection setup, descriptor registration and the
//! reconciliation loop.
//!
//! The loop runs a full resync at startup, then reacts to
//! - the resync timer, with a downstream resync against the stored desired state
//! - the retry timer, re-attempting retriably failed items
//! - SIGHUP, reloading the desired-state file with a full resync
//! - shutdown (ctrl-c), leaving the dataplane configured as it is

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};
use vpp_binapi::sim::SimVpp;
use vpp_binapi::vppcalls::{interface_handlers, punt_handlers};
use vpp_binapi::{Connection, Transport, UnixTransport};
use vpp_scheduler::{KvScheduler, SchedulerConfig, TxnResult};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::AgentConfig;
use crate::error::Result;
use crate::interfaces::{new_interface_index, InterfaceAddressDescriptor, InterfaceDescriptor};
use crate::northbound;
use crate::punt::{IpRedirectDescriptor, PuntExceptionDescriptor, PuntToHostDescriptor};

/// Resolves the handlers of every API module and registers all descriptors
/// with a new scheduler.
///
/// Fails when the peer speaks none of the supported versions of a module.
pub fn build_scheduler(conn: &Connection, config: SchedulerConfig) -> Result<KvScheduler> {
    let interfaces = interface_handlers().resolve(conn)?;
    audit_log!(AuditRecord::handler_selected("interface", &interfaces.version));
    let punt = punt_handlers().resolve(conn)?;
    audit_log!(AuditRecord::handler_selected("punt", &punt.version));

    let index = new_interface_index();
    let mut scheduler = KvScheduler::new(config);
    scheduler.register(InterfaceDescriptor::new(
        interfaces.handler.clone(),
        index.clone(),
    ))?;
    scheduler.register(InterfaceAddressDescriptor::new(
        interfaces.handler,
        index.clone(),
    ))?;
    scheduler.register(PuntToHostDescriptor::new(punt.handler.clone()))?;
    scheduler.register(PuntExceptionDescriptor::new(punt.handler.clone()))?;
    scheduler.register(IpRedirectDescriptor::new(punt.handler, index))?;
    Ok(scheduler)
}

/// A connected agent.
pub struct Agent {
    config: AgentConfig,
    scheduler: Mutex<KvScheduler>,
    // Keeps the reply reader running.
    _connection: Connection,
    sim: Option<Arc<SimVpp>>,
}

impl Agent {
    /// Connects to the dataplane named by the configuration.
    pub async fn connect(config: AgentConfig) -> Result<Self> {
        match config.connection.simulate {
            Some(dialect) => {
                info!(%dialect, "using simulated dataplane");
                let sim = SimVpp::new(dialect);
                let transport = sim.transport();
                Self::with_transport(config, transport, Some(sim)).await
            }
            None => {
                let transport = UnixTransport::connect(&config.connection.socket_path).await?;
                Self::with_transport(config, transport, None).await
            }
        }
    }

    pub async fn with_transport<T: Transport>(
        config: AgentConfig,
        transport: T,
        sim: Option<Arc<SimVpp>>,
    ) -> Result<Self> {
        let connection = Connection::connect(
            transport,
            &config.connection.client_name,
            config.request_timeout(),
        )
        .await?;
        let scheduler = build_scheduler(&connection, config.scheduler.clone())?;
        Ok(Self {
            config,
            scheduler: Mutex::new(scheduler),
            _connection: connection,
            sim,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Mutex<KvScheduler> {
        &self.scheduler
    }

    /// The simulated dataplane, when running against one.
    pub fn sim(&self) -> Option<&Arc<SimVpp>> {
        self.sim.as_ref()
    }

    pub fn desired_path(&self) -> &Path {
        &self.config.agent.desired_path
    }

    /// Loads the desired-state file and reconciles everything against it.
    #[instrument(skip(self), fields(path = %self.desired_path().display()))]
    pub async fn full_resync(&self) -> Result<TxnResult> {
        let values = northbound::load(self.desired_path())?;
        let result = self.scheduler.lock().await.resync(Some(values)).await?;
        audit_log!(AuditRecord::from_txn(&result));
        Ok(result)
    }

    /// Reconciles the dataplane against the stored desired state.
    pub async fn downstream_resync(&self) -> Result<TxnResult> {
        let result = self.scheduler.lock().await.resync(None).await?;
        audit_log!(AuditRecord::from_txn(&result));
        Ok(result)
    }

    /// Re-attempts failed items; `None` when there was nothing to retry.
    pub async fn retry_failed(&self) -> Result<Option<TxnResult>> {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.failed_keys().is_empty() {
            return Ok(None);
        }
        let result = scheduler.retry_failed().await?;
        drop(scheduler);
        if result.entries.is_empty() {
            return Ok(None);
        }
        audit_log!(AuditRecord::from_txn(&result));
        Ok(Some(result))
    }

    /// Runs until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("received SIGINT");
        })
        .await
    }

    /// Runs the reconciliation loop until `shutdown` completes.
    ///
    /// Only the startup resync is fatal; later failures are logged and the
    /// next tick tries again.
    pub async fn run_until<F: Future<Output = ()>>(&self, shutdown: F) -> Result<()> {
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "vppagent", "start")
                .with_outcome(AuditOutcome::Success)
        );
        self.full_resync().await?;

        let mut resync = self.config.resync_interval().map(periodic);
        let mut retry = periodic(self.config.retry_interval());
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::pin!(shutdown);

        info!(
            resync_secs = self.config.agent.resync_interval_secs,
            retry_secs = self.config.agent.retry_interval_secs,
            "reconciliation loop started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick(&mut resync) => {
                    if let Err(e) = self.downstream_resync().await {
                        warn!(error = %e, "downstream resync failed");
                    }
                }
                _ = retry.tick() => {
                    if let Err(e) = self.retry_failed().await {
                        warn!(error = %e, "retry of failed items failed");
                    }
                }
                _ = hangup.recv() => {
                    info!("received SIGHUP, reloading desired state");
                    self.reload().await;
                }
            }
        }

        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "vppagent", "stop")
                .with_outcome(AuditOutcome::Success)
        );
        info!("reconciliation loop stopped");
        Ok(())
    }

    async fn reload(&self) {
        let record = AuditRecord::new(
            AuditCategory::ConfigurationChange,
            "vppagent",
            "reload desired state",
        )
        .with_object_id(self.desired_path().display().to_string());
        match self.full_resync().await {
            Ok(_) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e) => {
                warn!(error = %e, "reload failed, keeping previous desired state");
                audit_log!(record
                    .with_outcome(AuditOutcome::Failure)
                    .with_error(e.to_string()));
            }
        }
    }
}

/// Interval whose first tick is one period away.
fn periodic(period: std::time::Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use vpp_binapi::Dialect;
    use vpp_scheduler::TxnKind;

    fn config(desired: &Path) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.connection.simulate = Some(Dialect::Vpp2001);
        config.agent.desired_path = desired.to_path_buf();
        config.agent.retry_interval_secs = 1;
        config
    }

    fn desired_file(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_startup_resync_configures_dataplane() {
        let file = desired_file(
            "interfaces:\n  - name: if1\n    enabled: true\n    ip_addresses: [10.0.0.1/24]\n",
        );
        let agent = Agent::connect(config(file.path())).await.unwrap();
        let result = agent.full_resync().await.unwrap();
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(result.operations(), 2);

        let sim = agent.sim().unwrap();
        let iface = sim
            .interfaces()
            .into_iter()
            .find(|i| i.tag == "if1")
            .unwrap();
        assert!(iface.admin_up);
        assert_eq!(iface.addresses, vec!["10.0.0.1/24".parse().unwrap()]);

        // Nothing left to do.
        assert_eq!(agent.downstream_resync().await.unwrap().operations(), 0);
        assert!(agent.retry_failed().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_desired_file_is_an_error() {
        let agent = Agent::connect(config(Path::new("/nonexistent/desired.yaml")))
            .await
            .unwrap();
        assert!(agent.full_resync().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_retries_failed_items() {
        let file = desired_file("interfaces:\n  - name: if1\n");
        let agent = Agent::connect(config(file.path())).await.unwrap();
        let sim = agent.sim().unwrap().clone();
        // Fails every attempt of the startup transaction with "try again".
        for _ in 0..agent.config().scheduler.max_attempts_per_txn {
            sim.fail_next("create_loopback", -116);
        }

        agent
            .run_until(tokio::time::sleep(Duration::from_millis(2500)))
            .await
            .unwrap();

        let scheduler = agent.scheduler().lock().await;
        assert!(scheduler.failed_keys().is_empty());
        let retried = scheduler.history().any(|r| r.kind == TxnKind::RetryFailed);
        assert!(retried);
        assert!(sim.interfaces().iter().any(|i| i.tag == "if1"));
    }
}
