use std::sync::Arc;

use serde_json::json;

use crate::accounts::AccountStore;
use crate::logging::{LogLevel, Logger};
use crate::protocol::{self, Reply, Request};
use crate::queues::{ClientQueue, Dequeued, QueueClosed, TaskQueue};
use crate::server::ConnectionRegistry;
use crate::tasks::{ClientTask, Command, Priority, Task};

use super::{PoolError, ThreadGroup};

const LOG_CONTEXT: &str = "pools::dispatcher";

pub struct DispatcherContext {
    pub client_queue: Arc<ClientQueue>,
    pub task_queue: Arc<TaskQueue>,
    pub registry: Arc<ConnectionRegistry>,
    pub accounts: Arc<AccountStore>,
    pub account_priority_override: bool,
    pub logger: Arc<Logger>,
}

pub fn start(threads: usize, context: Arc<DispatcherContext>) -> Result<ThreadGroup, PoolError> {
    let mut group = ThreadGroup::new("dispatcher");
    for _ in 0..threads {
        let context = Arc::clone(&context);
        group.spawn(move || run(&context))?;
    }
    Ok(group)
}

fn run(context: &DispatcherContext) {
    while let Dequeued::Item(client_task) = context.client_queue.pop() {
        dispatch(context, client_task);
    }
    context
        .logger
        .debug(Some(LOG_CONTEXT), "Client queue closed and drained");
}

fn dispatch(context: &DispatcherContext, client_task: ClientTask) {
    let ClientTask {
        connection_id,
        raw_command,
        arrival_seq,
    } = client_task;

    let command = match protocol::parse_request(&raw_command) {
        Ok(Request::Command(command)) => command,
        Ok(Request::Quit) => {
            context.registry.release(connection_id);
            return;
        }
        Err(error) => {
            context.logger.log(
                LogLevel::Debug,
                Some(LOG_CONTEXT),
                "Rejected malformed command",
                Some(json!({
                    "connection_id": connection_id,
                    "error": error.to_string(),
                })),
            );
            context
                .registry
                .respond(connection_id, &Reply::err(error.reply_reason()));
            return;
        }
    };

    let priority = resolve_priority(
        &command,
        &context.accounts,
        context.account_priority_override,
    );
    let task = Task {
        command,
        priority,
        connection_id,
        arrival_seq,
    };
    if let Err(QueueClosed { item, .. }) = context.task_queue.push(task) {
        context
            .registry
            .respond(item.connection_id, &Reply::err("server shutting down"));
    }
}

/// Default table priority, replaced by the account's stored priority for
/// account-bound commands when `use_account_priority` is set.
pub fn resolve_priority(
    command: &Command,
    accounts: &AccountStore,
    use_account_priority: bool,
) -> Priority {
    let kind = command.kind();
    if use_account_priority
        && kind.honours_account_priority()
        && let Some(stored) = accounts.priority_of(command.username())
    {
        return stored;
    }
    kind.default_priority()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::accounts::AccountStore;
    use crate::config::AppConfig;
    use crate::tasks::{Command, Priority};

    use super::resolve_priority;

    fn list(username: &str) -> Command {
        Command::List {
            username: username.to_owned(),
        }
    }

    #[test]
    fn falls_back_to_default_table() {
        let accounts = AccountStore::in_memory(100);
        assert_eq!(resolve_priority(&list("ghost"), &accounts, true), Priority::Low);
        let upload = Command::Upload {
            username: "ghost".to_owned(),
            filename: "a".to_owned(),
            size: 1,
            source: PathBuf::from("/tmp/a"),
        };
        assert_eq!(resolve_priority(&upload, &accounts, true), Priority::Normal);
    }

    #[test]
    fn default_config_keeps_table_priorities_for_registered_users() {
        let use_account_priority = AppConfig::default().scheduling.account_priority_override;
        let accounts = AccountStore::in_memory(100);
        accounts
            .signup("u", "pw", Priority::default())
            .expect("signup should work");

        assert_eq!(
            resolve_priority(&list("u"), &accounts, use_account_priority),
            Priority::Low
        );
        let delete = Command::Delete {
            username: "u".to_owned(),
            filename: "a".to_owned(),
        };
        assert_eq!(
            resolve_priority(&delete, &accounts, use_account_priority),
            Priority::High
        );
    }

    #[test]
    fn stored_priority_overrides_account_bound_commands() {
        let accounts = AccountStore::in_memory(100);
        accounts
            .signup("vip", "pw", Priority::High)
            .expect("signup should work");
        accounts
            .signup("bulk", "pw", Priority::Low)
            .expect("signup should work");

        assert_eq!(resolve_priority(&list("vip"), &accounts, true), Priority::High);
        assert_eq!(resolve_priority(&list("vip"), &accounts, false), Priority::Low);

        let login = Command::Login {
            username: "bulk".to_owned(),
            password: "pw".to_owned(),
        };
        assert_eq!(resolve_priority(&login, &accounts, true), Priority::High);
        let delete = Command::Delete {
            username: "bulk".to_owned(),
            filename: "a".to_owned(),
        };
        assert_eq!(resolve_priority(&delete, &accounts, true), Priority::Low);
    }
}
