//! TCP front end of the coordinator.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;

use super::frame::{recv_message, send_message};
use super::TransportError;
use crate::messages::{Envelope, Request, Response};

/// Accept poll interval; also bounds how late shutdown is noticed.
pub const ACCEPT_POLL: Duration = Duration::from_millis(300);

/// Sockets of live connections, keyed by connection id.
type Connections = Arc<Mutex<HashMap<usize, TcpStream>>>;

/// Accepts worker connections and forwards their requests.
pub struct RequestServer {
    local_addr: SocketAddr,
    accept_thread: Option<JoinHandle<()>>,
    connections: Connections,
    accepted: Arc<AtomicUsize>,
}

impl RequestServer {
    /// Bind and start accepting. Requests go to `tx`; the loop ends once
    /// `shutdown` is raised.
    pub fn bind(
        addr: impl ToSocketAddrs,
        tx: Sender<Envelope>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let conns = Arc::clone(&connections);
        let count = Arc::clone(&accepted);
        let accept_thread = std::thread::Builder::new()
            .name("RequestServer".to_string())
            .spawn(move || accept_loop(listener, tx, shutdown, conns, count))?;
        info!("request server listening on {}", local_addr);

        Ok(Self {
            local_addr,
            accept_thread: Some(accept_thread),
            connections,
            accepted,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections whose thread is still serving.
    pub fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Join the accept loop and close every open connection. The shutdown
    /// flag passed to [`bind`](Self::bind) must already be raised.
    pub fn stop(&mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        close_all(&self.connections);
    }
}

impl Drop for RequestServer {
    fn drop(&mut self) {
        close_all(&self.connections);
    }
}

fn close_all(connections: &Mutex<HashMap<usize, TcpStream>>) {
    for (_, stream) in connections.lock().drain() {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

fn accept_loop(
    listener: TcpListener,
    tx: Sender<Envelope>,
    shutdown: Arc<AtomicBool>,
    connections: Connections,
    accepted: Arc<AtomicUsize>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = accepted.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = spawn_connection(id, stream, peer, tx.clone(), &connections) {
                    warn!("failed to serve connection from {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("request server stopped accepting");
}

fn spawn_connection(
    id: usize,
    stream: TcpStream,
    peer: SocketAddr,
    tx: Sender<Envelope>,
    connections: &Connections,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    connections.lock().insert(id, stream.try_clone()?);
    let connections = Arc::clone(connections);
    std::thread::Builder::new()
        .name(format!("Connection-{}", id))
        .spawn(move || {
            debug!("connection {} from {}", id, peer);
            let closer = stream.try_clone();
            let result = serve_connection(stream, tx);
            // The server keeps a clone of the socket; close it for the peer
            // as well and forget it.
            if let Ok(closer) = closer {
                let _ = closer.shutdown(Shutdown::Both);
            }
            connections.lock().remove(&id);
            match result {
                Ok(()) | Err(TransportError::UnexpectedEof) | Err(TransportError::Disconnected) => {
                    debug!("connection {} closed", id)
                }
                Err(e) => warn!("connection {} from {} failed: {}", id, peer, e),
            }
        })?;
    Ok(())
}

fn serve_connection(stream: TcpStream, tx: Sender<Envelope>) -> Result<(), TransportError> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);
    loop {
        let request: Request = recv_message(&mut reader)?;
        let (reply, rx) = bounded::<Response>(1);
        tx.send(Envelope { request, reply })
            .map_err(|_| TransportError::Disconnected)?;
        let response = rx.recv().map_err(|_| TransportError::Disconnected)?;
        send_message(&mut writer, &response)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Payload;
    use crate::transport::{Client, TcpClient};
    use crossbeam_channel::unbounded;

    /// Answers every request with an ack of matching shape.
    fn echo_coordinator(rx: crossbeam_channel::Receiver<Envelope>) -> JoinHandle<usize> {
        std::thread::spawn(move || {
            let mut served = 0;
            while let Ok(Envelope { request, reply }) = rx.recv() {
                let response = match request {
                    Request::ModelFetch(p) => {
                        let snapshots = p
                            .clone()
                            .into_vec()
                            .into_iter()
                            .map(crate::core::model_version::ModelSnapshot::baseline)
                            .collect();
                        Response::Model(p.mirror(snapshots))
                    }
                    other => Response::Ack(Payload::One(!matches!(other, Request::GenerationConfig(_)))),
                };
                let _ = reply.send(response);
                served += 1;
            }
            served
        })
    }

    #[test]
    fn test_tcp_round_trip() {
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut server = RequestServer::bind("127.0.0.1:0", tx, Arc::clone(&shutdown)).unwrap();
        let coordinator = echo_coordinator(rx);

        let mut client = TcpClient::connect(server.local_addr()).unwrap();
        let snapshot = client.fetch_model(5).unwrap();
        assert_eq!(snapshot.era, 5);
        assert!(client.submit_result(crate::messages::EvalReport { era: 5, outcome: Some(1.0) }).is_ok());
        // Wrong response kind for the typed helper.
        assert!(matches!(
            client.generation_config(),
            Err(TransportError::UnexpectedResponse("ack"))
        ));
        assert_eq!(server.accepted(), 1);

        shutdown.store(true, Ordering::Relaxed);
        server.stop();
        drop(server);
        assert!(client.fetch_model(1).is_err());
        drop(client);
        assert_eq!(coordinator.join().unwrap(), 3);
    }

    #[test]
    fn test_closed_connections_are_forgotten() {
        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut server = RequestServer::bind("127.0.0.1:0", tx, Arc::clone(&shutdown)).unwrap();
        let coordinator = echo_coordinator(rx);

        for round in 0..3 {
            let mut client = TcpClient::connect(server.local_addr()).unwrap();
            assert_eq!(client.fetch_model(round).unwrap().era, round);
            assert_eq!(server.open_connections(), 1);
            drop(client);

            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while server.open_connections() > 0 && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            assert_eq!(server.open_connections(), 0);
        }
        assert_eq!(server.accepted(), 3);

        shutdown.store(true, Ordering::Relaxed);
        server.stop();
        drop(server);
        assert_eq!(coordinator.join().unwrap(), 3);
    }

    #[test]
    fn test_stopped_coordinator_disconnects_clients() {
        let (tx, rx) = unbounded::<Envelope>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut server = RequestServer::bind("127.0.0.1:0", tx, Arc::clone(&shutdown)).unwrap();
        drop(rx);

        let mut client = TcpClient::connect(server.local_addr()).unwrap();
        assert!(client.fetch_model(0).is_err());

        shutdown.store(true, Ordering::Relaxed);
        server.stop();
    }
}
