use core::time::Duration;
use std::path::PathBuf;
use std::sync::{
    Arc, Weak,
    atomic::{AtomicI64, Ordering},
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    Error, Result, SystemClock, TimeSource,
    coordinator::{
        CoordinationBackend, CreateMode, Endpoint, LocalWorkerIdFile, node_name, parse_node_name,
    },
    snowflake::MAX_WORKER_ID,
};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Scopes the namespace: `/snowflake/<app_name>`.
    pub app_name: String,
    pub ip: String,
    pub port: u16,
    /// Root of the local fallback file tree.
    pub config_dir: PathBuf,
    pub heartbeat_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            app_name: "leaf".to_owned(),
            ip: "127.0.0.1".to_owned(),
            port: 8080,
            config_dir: PathBuf::from("conf"),
            heartbeat_interval: Duration::from_secs(3),
        }
    }
}

impl CoordinatorConfig {
    /// The instance identity, `ip:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn root_path(&self) -> String {
        format!("/snowflake/{}", self.app_name)
    }

    /// Parent of every instance node ever registered.
    pub fn forever_path(&self) -> String {
        format!("{}/forever", self.root_path())
    }

    pub fn fallback_file(&self) -> LocalWorkerIdFile {
        LocalWorkerIdFile::for_port(&self.config_dir, &self.app_name, self.port)
    }
}

/// How an instance obtained its worker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Leased from the backend; the heartbeat is running.
    Registered { worker_id: i64 },
    /// Read from the local fallback file because the backend was unreachable
    /// or its record is ahead of the local clock. No heartbeat runs.
    Degraded { worker_id: i64 },
}

impl Registration {
    pub const fn worker_id(&self) -> i64 {
        match self {
            Self::Registered { worker_id } | Self::Degraded { worker_id } => *worker_id,
        }
    }

    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Leases a stable worker id per `ip:port` from a [`CoordinationBackend`].
///
/// Each instance ever seen owns one persistent node
/// `/snowflake/<app>/forever/<ip:port>-<worker id>`. A restarted instance
/// finds its node by address and keeps its id; a new instance creates a
/// sequential node and takes the id from the created name. The id is
/// mirrored to a [`LocalWorkerIdFile`] for degraded starts.
///
/// After a successful registration a heartbeat rewrites the node payload
/// with the current time every `heartbeat_interval`. The timestamp lets a
/// restarting instance detect that its clock is behind the last one it
/// published.
pub struct WorkerIdCoordinator<B, T = SystemClock>
where
    B: CoordinationBackend,
    T: TimeSource + 'static,
{
    inner: Arc<Inner<B, T>>,
}

impl<B, T> Clone for WorkerIdCoordinator<B, T>
where
    B: CoordinationBackend,
    T: TimeSource + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B, T> {
    backend: B,
    clock: T,
    config: CoordinatorConfig,
    fallback: LocalWorkerIdFile,
    node_path: Mutex<Option<String>>,
    worker_id: AtomicI64,
    last_update_ms: AtomicI64,
    shutdown: CancellationToken,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl<B> WorkerIdCoordinator<B, SystemClock>
where
    B: CoordinationBackend,
{
    pub fn new(backend: B, config: CoordinatorConfig) -> Self {
        Self::with_clock(backend, SystemClock, config)
    }
}

impl<B, T> WorkerIdCoordinator<B, T>
where
    B: CoordinationBackend,
    T: TimeSource + 'static,
{
    pub fn with_clock(backend: B, clock: T, config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                fallback: config.fallback_file(),
                config,
                node_path: Mutex::new(None),
                worker_id: AtomicI64::new(-1),
                last_update_ms: AtomicI64::new(0),
                shutdown: CancellationToken::new(),
                heartbeat_task: Mutex::new(None),
            }),
        }
    }

    /// Obtains the worker id and, unless degraded, starts the heartbeat.
    ///
    /// # Errors
    ///
    /// - [`Error::CoordinatorUnavailable`] if the backend is unreachable and
    ///   no fallback file exists.
    /// - [`Error::ClockMovedBackward`] if the backend record is ahead of the
    ///   local clock and no fallback file exists.
    /// - [`Error::WorkerIdOutOfRange`] if the leased or cached id does not
    ///   fit the Snowflake layout.
    /// - Any other backend or fallback file error.
    pub async fn init(&self) -> Result<Registration> {
        let registration = match self.inner.register().await {
            Err(Error::CoordinatorUnavailable(reason)) => {
                let Some(worker_id) = self.inner.fallback.read()? else {
                    return Err(Error::CoordinatorUnavailable(reason));
                };
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    worker_id,
                    %reason,
                    "coordination backend unreachable, using local worker id"
                );
                Registration::Degraded {
                    worker_id: check_worker_id(worker_id)?,
                }
            }
            other => other?,
        };
        self.inner
            .worker_id
            .store(registration.worker_id(), Ordering::Release);

        if let Registration::Registered { .. } = registration {
            self.start_heartbeat();
        }
        Ok(registration)
    }

    fn start_heartbeat(&self) {
        let mut task = self.inner.heartbeat_task.lock();
        if task.is_none() && !self.inner.shutdown.is_cancelled() {
            *task = Some(tokio::spawn(heartbeat_loop(
                Arc::downgrade(&self.inner),
                self.inner.shutdown.clone(),
                self.inner.config.heartbeat_interval,
            )));
        }
    }

    /// Publishes a fresh timestamp to the instance node.
    ///
    /// Returns `false` without touching the backend when there is no node
    /// (not registered, or degraded) or when the clock reads earlier than
    /// the last successful update.
    ///
    /// # Errors
    ///
    /// Propagates backend failures, including a concurrent version change.
    pub async fn heartbeat_once(&self) -> Result<bool> {
        self.inner.heartbeat_once().await
    }

    /// The leased worker id, once `init` succeeded.
    pub fn worker_id(&self) -> Option<i64> {
        let worker_id = self.inner.worker_id.load(Ordering::Acquire);
        (worker_id >= 0).then_some(worker_id)
    }

    /// Full path of this instance's node, when registered.
    pub fn node_path(&self) -> Option<String> {
        self.inner.node_path.lock().clone()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Stops the heartbeat and waits for it to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.heartbeat_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl<B, T> Inner<B, T>
where
    B: CoordinationBackend,
    T: TimeSource + 'static,
{
    fn payload(&self, now_ms: i64) -> Result<Vec<u8>> {
        Endpoint::new(self.config.ip.clone(), self.config.port, now_ms).to_payload()
    }

    async fn register(&self) -> Result<Registration> {
        let forever = self.config.forever_path();
        let address = self.config.address();

        let children = match self.backend.children(&forever).await {
            Ok(children) => children,
            Err(Error::NoNode(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        if children.is_empty() {
            let path = format!("{forever}/{}", node_name(&address, 0));
            let now = self.clock.current_millis();
            self.backend
                .create(&path, self.payload(now)?, CreateMode::Persistent)
                .await?;
            #[cfg(feature = "tracing")]
            tracing::info!(%address, "first instance registered with worker id 0");
            return self.adopt(path, 0, now);
        }

        let own = children.iter().find_map(|name| match parse_node_name(name) {
            Ok((node_address, worker_id)) => {
                (node_address == address).then(|| (name.clone(), worker_id))
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "ignoring foreign coordination node");
                None
            }
        });

        match own {
            Some((name, worker_id)) => {
                let path = format!("{forever}/{name}");
                let node = self.backend.node(&path).await?;
                let endpoint = Endpoint::from_payload(&node.payload)?;
                let now = self.clock.current_millis();
                if endpoint.timestamp > now {
                    return self.degraded(endpoint.timestamp - now);
                }
                #[cfg(feature = "tracing")]
                tracing::info!(%address, worker_id, "existing instance node adopted");
                self.adopt(path, worker_id, now)
            }
            None => {
                let prefix = format!("{forever}/{address}-");
                let now = self.clock.current_millis();
                let created = self
                    .backend
                    .create(&prefix, self.payload(now)?, CreateMode::PersistentSequential)
                    .await?;
                let name = created.rsplit('/').next().unwrap_or(&created);
                let (_, worker_id) = parse_node_name(name)?;
                #[cfg(feature = "tracing")]
                tracing::info!(%address, worker_id, "new instance node created");
                self.adopt(created, worker_id, now)
            }
        }
    }

    fn adopt(&self, path: String, worker_id: i64, now_ms: i64) -> Result<Registration> {
        let worker_id = check_worker_id(worker_id)?;
        *self.node_path.lock() = Some(path);
        self.last_update_ms.store(now_ms, Ordering::Release);
        if let Err(_e) = self.fallback.write(worker_id) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                path = %self.fallback.path().display(),
                error = %_e,
                "failed to cache worker id locally"
            );
        }
        Ok(Registration::Registered { worker_id })
    }

    fn degraded(&self, ahead_ms: i64) -> Result<Registration> {
        let Some(worker_id) = self.fallback.read()? else {
            return Err(Error::ClockMovedBackward {
                offset_ms: ahead_ms,
            });
        };
        #[cfg(feature = "tracing")]
        tracing::error!(
            worker_id,
            ahead_ms,
            "coordination record is ahead of the local clock, using local worker id"
        );
        Ok(Registration::Degraded {
            worker_id: check_worker_id(worker_id)?,
        })
    }

    async fn heartbeat_once(&self) -> Result<bool> {
        let Some(path) = self.node_path.lock().clone() else {
            return Ok(false);
        };
        let now = self.clock.current_millis();
        if now < self.last_update_ms.load(Ordering::Acquire) {
            #[cfg(feature = "tracing")]
            tracing::debug!(now, "clock behind last heartbeat, skipping");
            return Ok(false);
        }

        let node = self.backend.node(&path).await?;
        self.backend
            .set(&path, self.payload(now)?, node.version)
            .await?;
        self.last_update_ms.store(now, Ordering::Release);
        Ok(true)
    }
}

fn check_worker_id(worker_id: i64) -> Result<i64> {
    if (0..=MAX_WORKER_ID).contains(&worker_id) {
        Ok(worker_id)
    } else {
        Err(Error::WorkerIdOutOfRange {
            worker_id,
            max: MAX_WORKER_ID,
        })
    }
}

async fn heartbeat_loop<B, T>(
    inner: Weak<Inner<B, T>>,
    shutdown: CancellationToken,
    period: Duration,
) where
    B: CoordinationBackend,
    T: TimeSource + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(strong) = inner.upgrade() else { break };
                if let Err(_e) = strong.heartbeat_once().await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "heartbeat failed");
                }
            }
        }
    }
    #[cfg(feature = "tracing")]
    tracing::debug!("heartbeat task stopped");
}
