use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::json;

use crate::accounts::{AccountError, AccountStore};
use crate::logging::{LogLevel, Logger};
use crate::protocol::Reply;
use crate::queues::{Dequeued, TaskQueue};
use crate::server::{ConnectionRegistry, DeliveryOutcome};
use crate::storage::{Download, FileStore, StorageError};
use crate::tasks::{Command, Task};
use crate::utils::timing::measure_execution;

use super::{PoolError, ThreadGroup};

const LOG_CONTEXT: &str = "pools::worker";

pub struct WorkerContext {
    pub task_queue: Arc<TaskQueue>,
    pub registry: Arc<ConnectionRegistry>,
    pub accounts: Arc<AccountStore>,
    pub files: Arc<FileStore>,
    pub logger: Arc<Logger>,
}

pub fn start(threads: usize, context: Arc<WorkerContext>) -> Result<ThreadGroup, PoolError> {
    let mut group = ThreadGroup::new("worker");
    for _ in 0..threads {
        let context = Arc::clone(&context);
        group.spawn(move || run(&context))?;
    }
    Ok(group)
}

fn run(context: &WorkerContext) {
    while let Dequeued::Item(task) = context.task_queue.pop() {
        let reply = run_guarded(&context.logger, &task, || {
            execute(&task.command, &context.accounts, &context.files, &context.logger)
        });
        deliver(context, &task, &reply);
    }
    context
        .logger
        .debug(Some(LOG_CONTEXT), "Task queue closed and drained");
}

/// Runs one task under the execution timer; a panic becomes an error reply
/// instead of taking the worker thread down.
fn run_guarded<F>(logger: &Logger, task: &Task, handler: F) -> Reply
where
    F: FnOnce() -> Reply,
{
    let task_name = format!("{} #{}", task.kind(), task.arrival_seq);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        measure_execution(&task_name, Some(LOG_CONTEXT), logger, handler)
    }));
    outcome.unwrap_or_else(|_| {
        logger.log(
            LogLevel::Error,
            Some(LOG_CONTEXT),
            "Task handler panicked",
            Some(json!({
                "kind": task.kind().verb(),
                "connection_id": task.connection_id,
                "arrival_seq": task.arrival_seq,
            })),
        );
        Reply::err("internal error")
    })
}

fn deliver(context: &WorkerContext, task: &Task, reply: &Reply) {
    let outcome = context.registry.respond(task.connection_id, reply);
    let payload = json!({
        "kind": task.kind().verb(),
        "priority": task.priority.as_str(),
        "connection_id": task.connection_id,
        "arrival_seq": task.arrival_seq,
        "ok": reply.is_ok(),
    });
    match outcome {
        DeliveryOutcome::Delivered => context.logger.log(
            LogLevel::Debug,
            Some(LOG_CONTEXT),
            "Reply delivered",
            Some(payload),
        ),
        DeliveryOutcome::ConnectionGone => context.logger.log(
            LogLevel::Debug,
            Some(LOG_CONTEXT),
            "Connection closed before reply; discarded",
            Some(payload),
        ),
        DeliveryOutcome::WriteFailed(error) => context.logger.log(
            LogLevel::Warn,
            Some(LOG_CONTEXT),
            &format!("Reply write failed: {error}"),
            Some(payload),
        ),
    }
}

/// Executes `command` against the stores and renders the reply.
pub fn execute(
    command: &Command,
    accounts: &AccountStore,
    files: &FileStore,
    logger: &Logger,
) -> Reply {
    match command {
        Command::Signup {
            username,
            password,
            priority,
        } => match accounts.signup(username, password, *priority) {
            Ok(_) => {
                if let Err(error) = files.ensure_user_dir(username) {
                    logger.warn(
                        Some(LOG_CONTEXT),
                        &format!("signed up '{username}' without a directory: {error}"),
                    );
                }
                Reply::ok()
            }
            Err(error) => Reply::err(error.reply_reason()),
        },
        Command::Login { username, password } => match accounts.login(username, password) {
            Ok(()) => Reply::ok(),
            Err(error) => Reply::err(error.reply_reason()),
        },
        Command::Upload {
            username,
            filename,
            size,
            source,
        } => {
            let Some(user) = accounts.get(username) else {
                let error = AccountError::UnknownUser {
                    username: username.clone(),
                };
                return Reply::err(error.reply_reason());
            };
            let uploaded = files
                .admit_upload(username, *size, user.priority)
                .and_then(|()| {
                    files.upload(username, filename, *size, source, Some(user.quota_bytes))
                });
            match uploaded {
                Ok(written) => Reply::ok_with(written.to_string()),
                Err(error) => storage_failure(logger, &error),
            }
        }
        // Without an account there is nothing to list; the directory is
        // never touched, whatever sits under that name.
        Command::List { username } if !accounts.exists(username) => Reply::ok_with(""),
        Command::List { username } => match files.list(username) {
            Ok(names) => Reply::ok_with(names.join(" ")),
            Err(error) => storage_failure(logger, &error),
        },
        Command::Download { username, filename } | Command::Delete { username, filename }
            if !accounts.exists(username) =>
        {
            Reply::err(
                StorageError::NotFound {
                    username: username.clone(),
                    filename: filename.clone(),
                }
                .reply_reason(),
            )
        }
        Command::Download { username, filename } => {
            let delivery = files.delivery_for(accounts.priority_of(username));
            match files.download(username, filename, delivery) {
                Ok(Download::Exported { path, .. }) => Reply::ok_with(path.display().to_string()),
                Ok(Download::Inline(body)) => Reply::OkWithBody {
                    summary: body.len().to_string(),
                    body,
                },
                Err(error) => storage_failure(logger, &error),
            }
        }
        Command::Delete { username, filename } => match files.delete(username, filename) {
            Ok(()) => Reply::ok(),
            Err(error) => storage_failure(logger, &error),
        },
    }
}

fn storage_failure(logger: &Logger, error: &StorageError) -> Reply {
    if matches!(error, StorageError::Io { .. }) {
        logger.error(Some(LOG_CONTEXT), &error.to_string());
    }
    Reply::err(error.reply_reason())
}
