//! Registration of remote worker hosts.
//!
//! A host connects to the entry port, sends an [`EntryRequest`] and receives
//! the full training config together with the worker ids it should run as
//! generators and as evaluators. Ids are handed out once and never reused.

use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::TrainConfig;
use crate::messages::{EntryRequest, EntryResponse};
use crate::transport::server::ACCEPT_POLL;
use crate::transport::{recv_message, send_message, TransportError};

/// Time a registering host gets to send its handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sticky generator/evaluator split.
#[derive(Debug, Clone)]
pub struct RoleAssigner {
    eworker_rate: f32,
    generators: Vec<usize>,
    evaluators: Vec<usize>,
    next_id: usize,
}

impl RoleAssigner {
    pub fn new(eworker_rate: f32) -> Self {
        Self {
            eworker_rate,
            generators: Vec::new(),
            evaluators: Vec::new(),
            next_id: 0,
        }
    }

    /// Assign `num_process` fresh ids: (generator ids, evaluator ids).
    ///
    /// A worker becomes a generator while
    /// `generators · eworker_rate < evaluators − 1`, else an evaluator.
    pub fn assign(&mut self, num_process: usize) -> (Vec<usize>, Vec<usize>) {
        let mut gids = Vec::new();
        let mut eids = Vec::new();
        for _ in 0..num_process {
            let id = self.next_id;
            self.next_id += 1;
            let generators = self.generators.len() as f64 * self.eworker_rate as f64;
            let evaluators = self.evaluators.len() as f64 - 1.0;
            if generators < evaluators {
                gids.push(id);
                self.generators.push(id);
            } else {
                eids.push(id);
                self.evaluators.push(id);
            }
        }
        (gids, eids)
    }

    pub fn generators(&self) -> &[usize] {
        &self.generators
    }

    pub fn evaluators(&self) -> &[usize] {
        &self.evaluators
    }
}

/// TCP registration service.
pub struct EntryService {
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
    roles: Arc<Mutex<RoleAssigner>>,
}

impl EntryService {
    pub fn bind(
        addr: impl ToSocketAddrs,
        config: TrainConfig,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let roles = Arc::new(Mutex::new(RoleAssigner::new(config.eworker_rate)));

        let assigner = Arc::clone(&roles);
        let thread = std::thread::Builder::new()
            .name("EntryService".to_string())
            .spawn(move || entry_loop(listener, config, assigner, shutdown))?;
        info!("started entry server {}", local_addr);

        Ok(Self {
            local_addr,
            thread: Some(thread),
            roles,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// (generator ids, evaluator ids) assigned so far.
    pub fn assigned(&self) -> (Vec<usize>, Vec<usize>) {
        let roles = self.roles.lock();
        (roles.generators().to_vec(), roles.evaluators().to_vec())
    }

    /// Join the accept loop; the shutdown flag must already be raised.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn entry_loop(
    listener: TcpListener,
    config: TrainConfig,
    roles: Arc<Mutex<RoleAssigner>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = register(stream, &config, &roles) {
                    warn!("entry from {} failed: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("entry accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    info!("finished entry server");
}

fn register(
    stream: TcpStream,
    config: &TrainConfig,
    roles: &Mutex<RoleAssigner>,
) -> Result<(), TransportError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    let request: EntryRequest = recv_message(&mut reader)?;
    info!("accepted entry from {}!", request.host);
    let (generator_ids, evaluator_ids) = roles.lock().assign(request.num_process);
    debug!(
        "{}: generators {:?}, evaluators {:?}",
        request.host, generator_ids, evaluator_ids
    );
    send_message(
        &mut writer,
        &EntryResponse {
            config: config.clone(),
            generator_ids,
            evaluator_ids,
        },
    )
}

/// Client side of the handshake.
pub fn request_entry(
    addr: impl ToSocketAddrs,
    request: &EntryRequest,
) -> Result<EntryResponse, TransportError> {
    let stream = TcpStream::connect(addr)?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    let mut reader = BufReader::new(stream);
    send_message(&mut writer, request)?;
    recv_message(&mut reader)
}
