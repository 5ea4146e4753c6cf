use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::protocol::Reply;

use super::connection::Connection;
use super::{ConnectionId, ServerError};

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Already released, e.g. closed during shutdown.
    ConnectionGone,
    WriteFailed(String),
}

/// Owns every open connection from accept until its reply is written.
/// Workers only hold a connection id and look the stream up here.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<Arc<Connection>, ServerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(id, stream, peer_addr)?);
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .insert(id, Arc::clone(&connection));
        Ok(connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Writes the reply and then closes and forgets the connection.
    pub fn respond(&self, id: ConnectionId, reply: &Reply) -> DeliveryOutcome {
        let Some(connection) = self.get(id) else {
            return DeliveryOutcome::ConnectionGone;
        };
        let outcome = match connection.write_reply(reply) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(error) => DeliveryOutcome::WriteFailed(error.to_string()),
        };
        self.release(id);
        outcome
    }

    /// Closes and forgets the connection. Releasing twice is a no-op.
    pub fn release(&self, id: ConnectionId) -> bool {
        let removed = self
            .connections
            .lock()
            .expect("connection registry lock poisoned")
            .remove(&id);
        match removed {
            Some(connection) => {
                let _ = connection.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) -> usize {
        let drained = self
            .connections
            .lock()
            .expect("connection registry lock poisoned")
            .drain()
            .map(|(_, connection)| connection)
            .collect::<Vec<_>>();
        for connection in &drained {
            let _ = connection.shutdown();
        }
        drained.len()
    }

    pub fn count(&self) -> usize {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use crate::protocol::Reply;
    use crate::server::LineRead;

    use super::{ConnectionRegistry, DeliveryOutcome};

    fn connected_pair(registry: &ConnectionRegistry) -> (u64, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let client = TcpStream::connect(listener.local_addr().expect("addr"))
            .expect("client should connect");
        let (stream, peer) = listener.accept().expect("accept should work");
        let connection = registry.register(stream, peer).expect("register should work");
        (connection.id(), client)
    }

    #[test]
    fn ids_are_unique_and_counted() {
        let registry = ConnectionRegistry::new();
        let (first, _c1) = connected_pair(&registry);
        let (second, _c2) = connected_pair(&registry);
        assert_ne!(first, second);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn respond_writes_reply_then_closes() {
        let registry = ConnectionRegistry::new();
        let (id, client) = connected_pair(&registry);

        assert_eq!(registry.respond(id, &Reply::ok_with("5")), DeliveryOutcome::Delivered);
        assert_eq!(registry.count(), 0);

        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).expect("read should work");
        assert_eq!(line, "OK 5\n");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).expect("stream should be closed");
        assert!(rest.is_empty());
    }

    #[test]
    fn responding_to_released_connection_is_discarded() {
        let registry = ConnectionRegistry::new();
        let (id, _client) = connected_pair(&registry);

        assert!(registry.release(id));
        assert!(!registry.release(id));
        assert_eq!(registry.respond(id, &Reply::ok()), DeliveryOutcome::ConnectionGone);
    }

    #[test]
    fn reads_one_bounded_line() {
        let registry = ConnectionRegistry::new();
        let (id, mut client) = connected_pair(&registry);
        let connection = registry.get(id).expect("registered");

        client.write_all(b"LIST alice\r\nignored").expect("write should work");
        assert_eq!(
            connection
                .read_line(64, Duration::from_secs(2))
                .expect("read should work"),
            LineRead::Line("LIST alice".to_owned())
        );

        let (id, mut client) = connected_pair(&registry);
        let connection = registry.get(id).expect("registered");
        client.write_all(&[b'x'; 40]).expect("write should work");
        assert_eq!(
            connection
                .read_line(16, Duration::from_secs(2))
                .expect("read should work"),
            LineRead::TooLong
        );
    }

    #[test]
    fn read_reports_eof_and_timeout() {
        let registry = ConnectionRegistry::new();
        let (id, client) = connected_pair(&registry);
        let connection = registry.get(id).expect("registered");
        drop(client);
        assert_eq!(
            connection
                .read_line(64, Duration::from_secs(2))
                .expect("read should work"),
            LineRead::Eof
        );

        let (id, _client) = connected_pair(&registry);
        let connection = registry.get(id).expect("registered");
        assert_eq!(
            connection
                .read_line(64, Duration::from_millis(50))
                .expect("read should work"),
            LineRead::TimedOut
        );
    }

    #[test]
    fn close_all_empties_registry() {
        let registry = ConnectionRegistry::new();
        let _pairs = (0..3).map(|_| connected_pair(&registry)).collect::<Vec<_>>();
        assert_eq!(registry.close_all(), 3);
        assert_eq!(registry.count(), 0);
    }
}
