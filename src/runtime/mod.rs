//! Wires the stores, queues and pools into a running server and tears them
//! down again in dependency order.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::accounts::{AccountError, AccountStore};
use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::pools::acceptor::{self, AcceptorContext};
use crate::pools::dispatcher::{self, DispatcherContext};
use crate::pools::worker::{self, WorkerContext};
use crate::pools::{JoinReport, PoolError, ThreadGroup};
use crate::queues::{ClientQueue, QueueStats, TaskQueue};
use crate::server::{ConnectionRegistry, ServerError, TcpServer};
use crate::storage::{FileStore, StorageError};
use crate::tasks::ArrivalClock;

const LOG_CONTEXT: &str = "runtime";

#[derive(Debug)]
pub enum RuntimeError {
    Server(ServerError),
    Accounts(AccountError),
    Storage(StorageError),
    Pool(PoolError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(source) => write!(f, "server startup failed: {source}"),
            Self::Accounts(source) => write!(f, "account store startup failed: {source}"),
            Self::Storage(source) => write!(f, "file store startup failed: {source}"),
            Self::Pool(source) => write!(f, "thread pool startup failed: {source}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Server(source) => Some(source),
            Self::Accounts(source) => Some(source),
            Self::Storage(source) => Some(source),
            Self::Pool(source) => Some(source),
        }
    }
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub joins: JoinReport,
    pub closed_connections: usize,
    pub client_queue: QueueStats,
    pub task_queue: QueueStats,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.joins.is_clean()
    }
}

struct Pools {
    acceptors: ThreadGroup,
    dispatchers: ThreadGroup,
    workers: ThreadGroup,
}

pub struct FileServerRuntime {
    logger: Arc<Logger>,
    server: TcpServer,
    accepting: Arc<AtomicBool>,
    registry: Arc<ConnectionRegistry>,
    client_queue: Arc<ClientQueue>,
    task_queue: Arc<TaskQueue>,
    accounts: Arc<AccountStore>,
    files: Arc<FileStore>,
    pools: Pools,
    join_timeout: Duration,
}

impl FileServerRuntime {
    pub fn start(app_config: &AppConfig, logger: Arc<Logger>) -> Result<Self, RuntimeError> {
        let files = Arc::new(
            FileStore::from_app_config(app_config, &logger).map_err(RuntimeError::Storage)?,
        );
        let accounts = Arc::new(
            AccountStore::from_app_config(app_config, &logger).map_err(RuntimeError::Accounts)?,
        );
        let server = TcpServer::bind(&app_config.server).map_err(RuntimeError::Server)?;

        let server_config = &app_config.server;
        let registry = Arc::new(ConnectionRegistry::new());
        let client_queue = Arc::new(ClientQueue::new(
            "client",
            app_config.queues.client_capacity,
        ));
        let task_queue = Arc::new(TaskQueue::new("task", app_config.queues.task_capacity));
        let accepting = Arc::new(AtomicBool::new(true));

        // Consumers first, so nothing is ever queued without a reader.
        let workers = worker::start(
            server_config.worker_threads,
            Arc::new(WorkerContext {
                task_queue: Arc::clone(&task_queue),
                registry: Arc::clone(&registry),
                accounts: Arc::clone(&accounts),
                files: Arc::clone(&files),
                logger: Arc::clone(&logger),
            }),
        );
        let workers = match workers {
            Ok(workers) => workers,
            Err(error) => {
                task_queue.close();
                return Err(RuntimeError::Pool(error));
            }
        };

        let dispatchers = dispatcher::start(
            server_config.dispatcher_threads,
            Arc::new(DispatcherContext {
                client_queue: Arc::clone(&client_queue),
                task_queue: Arc::clone(&task_queue),
                registry: Arc::clone(&registry),
                accounts: Arc::clone(&accounts),
                account_priority_override: app_config.scheduling.account_priority_override,
                logger: Arc::clone(&logger),
            }),
        );
        let dispatchers = match dispatchers {
            Ok(dispatchers) => dispatchers,
            Err(error) => {
                client_queue.close();
                task_queue.close();
                drop(workers);
                return Err(RuntimeError::Pool(error));
            }
        };

        let acceptors = acceptor::start(
            server_config.acceptor_threads,
            Arc::new(AcceptorContext {
                listener: server.listener(),
                registry: Arc::clone(&registry),
                client_queue: Arc::clone(&client_queue),
                clock: Arc::new(ArrivalClock::new()),
                accepting: Arc::clone(&accepting),
                logger: Arc::clone(&logger),
                read_timeout: Duration::from_millis(server_config.read_timeout_ms),
                max_line_bytes: server_config.max_line_bytes,
            }),
        );
        let acceptors = match acceptors {
            Ok(acceptors) => acceptors,
            Err(error) => {
                accepting.store(false, Ordering::SeqCst);
                server.wake_acceptors(server_config.acceptor_threads);
                client_queue.close();
                task_queue.close();
                drop((dispatchers, workers));
                return Err(RuntimeError::Pool(error));
            }
        };

        logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "File server started",
            Some(json!({
                "local_addr": server.local_addr().to_string(),
                "acceptor_threads": acceptors.len(),
                "dispatcher_threads": dispatchers.len(),
                "worker_threads": workers.len(),
                "client_queue_capacity": app_config.queues.client_capacity,
                "task_queue_capacity": app_config.queues.task_capacity,
                "account_priority_override": app_config.scheduling.account_priority_override,
            })),
        );

        Ok(Self {
            logger,
            server,
            accepting,
            registry,
            client_queue,
            task_queue,
            accounts,
            files,
            pools: Pools {
                acceptors,
                dispatchers,
                workers,
            },
            join_timeout: Duration::from_millis(app_config.shutdown.join_timeout_ms),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Stops accepting, drains both queues through their consumers and
    /// closes whatever connections are left. Every join shares one deadline.
    pub fn shutdown(self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + self.join_timeout;
        let Pools {
            acceptors,
            dispatchers,
            workers,
        } = self.pools;
        let mut joins = JoinReport::default();

        self.accepting.store(false, Ordering::SeqCst);
        let woken = self.server.wake_acceptors(acceptors.len());
        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Stopped accepting connections",
            Some(json!({
                "acceptors": acceptors.len(),
                "woken": woken,
                "open_connections": self.registry.count(),
            })),
        );
        joins.merge(join_stage(&self.logger, acceptors, deadline));

        self.client_queue.close();
        joins.merge(join_stage(&self.logger, dispatchers, deadline));

        self.task_queue.close();
        joins.merge(join_stage(&self.logger, workers, deadline));

        let closed_connections = self.registry.close_all();
        if let Err(error) = self.accounts.flush() {
            self.logger.error(
                Some(LOG_CONTEXT),
                &format!("account store flush failed: {error}"),
            );
        }
        match self.files.sweep_exports(Duration::ZERO) {
            Ok(removed) => self.logger.log(
                LogLevel::Debug,
                Some(LOG_CONTEXT),
                "Removed exported downloads",
                Some(json!({ "removed": removed })),
            ),
            Err(error) => self.logger.warn(
                Some(LOG_CONTEXT),
                &format!("failed to remove exported downloads: {error}"),
            ),
        }

        let report = ShutdownReport {
            joins,
            closed_connections,
            client_queue: self.client_queue.stats(),
            task_queue: self.task_queue.stats(),
            elapsed: started.elapsed(),
        };
        let level = if report.is_clean() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        self.logger.log(
            level,
            Some(LOG_CONTEXT),
            if report.is_clean() {
                "Shutdown complete"
            } else {
                "Shutdown forced; some threads did not exit cleanly"
            },
            Some(json!({
                "stragglers": report.joins.stragglers,
                "panicked": report.joins.panicked,
                "closed_connections": report.closed_connections,
                "tasks_executed": report.task_queue.popped,
                "task_queue_high_water_mark": report.task_queue.high_water_mark,
                "elapsed_ms": report.elapsed.as_millis() as u64,
            })),
        );
        report
    }
}

fn join_stage(logger: &Logger, group: ThreadGroup, deadline: Instant) -> JoinReport {
    let prefix = group.prefix();
    let report = group.join_within(deadline);
    logger.log(
        if report.is_clean() {
            LogLevel::Debug
        } else {
            LogLevel::Error
        },
        Some(LOG_CONTEXT),
        &format!("Joined {prefix} threads"),
        Some(json!({
            "joined": report.joined.len(),
            "stragglers": report.stragglers,
            "panicked": report.panicked,
        })),
    );
    report
}
