use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::logging::{LogLevel, Logger};
use crate::protocol::Reply;
use crate::queues::{ClientQueue, QueueClosed};
use crate::server::{Connection, ConnectionRegistry, LineRead};
use crate::tasks::{ArrivalClock, ClientTask};

use super::{PoolError, ThreadGroup};

const LOG_CONTEXT: &str = "pools::acceptor";
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

pub struct AcceptorContext {
    pub listener: Arc<TcpListener>,
    pub registry: Arc<ConnectionRegistry>,
    pub client_queue: Arc<ClientQueue>,
    pub clock: Arc<ArrivalClock>,
    pub accepting: Arc<AtomicBool>,
    pub logger: Arc<Logger>,
    pub read_timeout: Duration,
    pub max_line_bytes: usize,
}

pub fn start(threads: usize, context: Arc<AcceptorContext>) -> Result<ThreadGroup, PoolError> {
    let mut group = ThreadGroup::new("acceptor");
    for _ in 0..threads {
        let context = Arc::clone(&context);
        group.spawn(move || run(&context))?;
    }
    Ok(group)
}

fn run(context: &AcceptorContext) {
    let mut backoff = ACCEPT_BACKOFF_MIN;
    loop {
        let accepted = context.listener.accept();
        if !context.accepting.load(Ordering::SeqCst) {
            // Shutdown wake-up or a late client; either way the socket drops here.
            break;
        }

        let (stream, peer_addr) = match accepted {
            Ok(accepted) => {
                backoff = ACCEPT_BACKOFF_MIN;
                accepted
            }
            Err(error) => {
                // Persistent failures such as EMFILE would otherwise spin.
                context.logger.warn(
                    Some(LOG_CONTEXT),
                    &format!(
                        "accept failed, retrying in {} ms: {error}",
                        backoff.as_millis()
                    ),
                );
                thread::sleep(backoff);
                backoff = next_backoff(backoff);
                continue;
            }
        };

        match context.registry.register(stream, peer_addr) {
            Ok(connection) => serve(context, &connection),
            Err(error) => context.logger.warn(
                Some(LOG_CONTEXT),
                &format!("dropping connection from {peer_addr}: {error}"),
            ),
        }
    }

    context
        .logger
        .debug(Some(LOG_CONTEXT), "Acceptor stopped accepting connections");
}

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(ACCEPT_BACKOFF_MAX)
}

/// Reads the single request line of `connection` and queues it for parsing.
fn serve(context: &AcceptorContext, connection: &Connection) {
    let id = connection.id();
    let line = match connection.read_line(context.max_line_bytes, context.read_timeout) {
        Ok(LineRead::Line(line)) => line,
        Ok(LineRead::Eof) => {
            context.registry.release(id);
            return;
        }
        Ok(LineRead::TimedOut) => {
            context.registry.respond(id, &Reply::err("read timeout"));
            return;
        }
        Ok(LineRead::TooLong) => {
            context.registry.respond(
                id,
                &Reply::err(format!(
                    "command longer than {} bytes",
                    context.max_line_bytes
                )),
            );
            return;
        }
        Err(error) => {
            context.logger.warn(
                Some(LOG_CONTEXT),
                &format!("read from connection {id} failed: {error}"),
            );
            context.registry.release(id);
            return;
        }
    };

    if line.trim().is_empty() {
        context.registry.respond(id, &Reply::err("empty command"));
        return;
    }

    let client_task = ClientTask {
        connection_id: id,
        raw_command: line,
        arrival_seq: context.clock.tick(),
    };
    context.logger.log(
        LogLevel::Verbose,
        Some(LOG_CONTEXT),
        "Queued client command",
        Some(json!({
            "connection_id": id,
            "peer_addr": connection.peer_addr().to_string(),
            "arrival_seq": client_task.arrival_seq,
        })),
    );

    if let Err(QueueClosed { item, .. }) = context.client_queue.push(client_task) {
        context
            .registry
            .respond(item.connection_id, &Reply::err("server shutting down"));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ACCEPT_BACKOFF_MAX, ACCEPT_BACKOFF_MIN, next_backoff};

    #[test]
    fn accept_backoff_doubles_up_to_the_cap() {
        let mut delays = vec![ACCEPT_BACKOFF_MIN];
        for _ in 0..10 {
            let last = *delays.last().expect("at least one delay");
            delays.push(next_backoff(last));
        }

        assert_eq!(delays[1], Duration::from_millis(10));
        assert_eq!(delays[2], Duration::from_millis(20));
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*delays.last().expect("delays"), ACCEPT_BACKOFF_MAX);
    }
}
