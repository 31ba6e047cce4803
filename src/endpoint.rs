//! Blocking UDP endpoints over the Sans-IO core.
//!
//! [`ClientEndpoint`] drives one [`Client`] with a background receive
//! thread; `connect`/`send`/`receive`/`close` block with explicit
//! deadlines, waiting on a condition variable (never polling).
//!
//! [`ServerEndpoint`] runs a single receive loop plus a bounded worker
//! pool. Sessions are keyed by peer address and each owns a lock, so one
//! worker at a time drives a given peer while distinct peers progress in
//! parallel. A session is only allocated once the stateless cookie check
//! passes; cookieless ClientHellos are answered from the receive loop
//! without committing state.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::server::{stateless_cookie_check, StatelessVerdict};
use crate::{Client, Config, Error, Output, Server};

/// Callback invoked with `(peer, plaintext)` for received datagrams.
pub type DataCallback = Arc<dyn Fn(SocketAddr, &[u8]) + Send + Sync>;

/// Ceiling for socket read timeouts so shutdown is observed promptly.
const MAX_SOCKET_WAIT: Duration = Duration::from_millis(500);

fn clamp_wait(until: Instant, now: Instant) -> Duration {
    until
        .saturating_duration_since(now)
        .clamp(Duration::from_millis(1), MAX_SOCKET_WAIT)
}

/// Receive errors that just mean an ICMP port-unreachable bounced back
/// (Windows `SIO_UDP_CONNRESET` semantics); these never end the endpoint.
fn is_transient_recv_error(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused)
}

// ======================================================================
// Client endpoint

struct ClientIo {
    dtls: Client,
    connected: bool,
    dead: Option<String>,
    inbox: VecDeque<Vec<u8>>,
    callback: Option<DataCallback>,
    next_wake: Instant,
}

struct ClientShared {
    socket: UdpSocket,
    peer: SocketAddr,
    state: Mutex<ClientIo>,
    cond: Condvar,
    shutdown: AtomicBool,
}

impl ClientShared {
    /// Drain engine output while holding the state lock: datagrams to the
    /// socket, plaintext to the inbox, timers to `next_wake`. Returns data
    /// destined for the callback; the caller delivers it after releasing
    /// the lock (a callback may call back into `send`).
    fn drain(&self, io: &mut ClientIo) -> Vec<Vec<u8>> {
        let now = Instant::now();
        // Arm the current flight's timer so freshly queued records are
        // released in this pass.
        if io.dead.is_none() {
            if let Err(e) = io.dtls.handle_timeout(now) {
                io.dead = Some(e.to_string());
            }
        }

        let mut for_callback = Vec::new();
        loop {
            match io.dtls.poll_output(now) {
                Output::Packet(packet) => {
                    if let Err(e) = self.socket.send(&packet) {
                        debug!("udp send failed: {}", e);
                    }
                }
                Output::Connected => io.connected = true,
                Output::PeerCert(_) => {
                    // Surfaced by the Sans-IO API; the blocking endpoint
                    // accepts the handshake-level signature checks.
                }
                Output::ApplicationData(data) => {
                    if io.callback.is_some() {
                        for_callback.push(data);
                    } else {
                        io.inbox.push_back(data);
                    }
                }
                Output::Timeout(at) => {
                    io.next_wake = at;
                    break;
                }
            }
        }
        self.cond.notify_all();
        for_callback
    }

    /// Drain, then deliver callback data outside the lock.
    fn drain_and_deliver(&self, mut io: std::sync::MutexGuard<'_, ClientIo>) {
        let for_callback = self.drain(&mut io);
        let callback = io.callback.clone();
        drop(io);

        if let Some(callback) = callback {
            for data in for_callback {
                callback(self.peer, &data);
            }
        }
    }

    fn receive_loop(&self) {
        let mut buf = vec![0u8; 65_535];

        while !self.shutdown.load(Ordering::Acquire) {
            let (wait, closed) = {
                let io = self.state.lock().expect("client endpoint poisoned");
                (clamp_wait(io.next_wake, Instant::now()), io.dtls.is_closed())
            };
            if closed {
                self.cond.notify_all();
                break;
            }

            if self.socket.set_read_timeout(Some(wait)).is_err() {
                break;
            }

            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    let mut io = self.state.lock().expect("client endpoint poisoned");
                    if let Err(e) = io.dtls.handle_packet(&buf[..n]) {
                        io.dead = Some(e.to_string());
                    }
                    self.drain_and_deliver(io);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    let mut io = self.state.lock().expect("client endpoint poisoned");
                    if let Err(e) = io.dtls.handle_timeout(Instant::now()) {
                        io.dead = Some(e.to_string());
                    }
                    self.drain_and_deliver(io);
                }
                Err(e) if is_transient_recv_error(e.kind()) => {
                    trace!("suppressing ICMP-induced socket error: {}", e);
                }
                Err(e) => {
                    let mut io = self.state.lock().expect("client endpoint poisoned");
                    io.dead = Some(e.to_string());
                    self.cond.notify_all();
                    break;
                }
            }
        }
    }
}

/// A blocking DTLS client bound to a UDP socket.
pub struct ClientEndpoint {
    shared: Arc<ClientShared>,
    receiver: Option<JoinHandle<()>>,
    receive_timeout: Duration,
}

impl ClientEndpoint {
    /// Connect to `peer` and run the handshake to completion.
    ///
    /// `receive_timeout` bounds later [`receive`](Self::receive) calls;
    /// `connect_timeout` bounds the handshake itself.
    pub fn connect(
        config: Arc<Config>,
        peer: SocketAddr,
        receive_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<ClientEndpoint, Error> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal address")
        } else {
            "[::]:0".parse().expect("literal address")
        };
        let socket = UdpSocket::bind(bind_addr)
            .and_then(|s| s.connect(peer).map(|_| s))
            .map_err(|e| Error::InternalError(format!("udp socket: {}", e)))?;

        let mut dtls = Client::new(config.clone());
        dtls.set_mtu(config.mtu_for(peer.is_ipv4()));

        let shared = Arc::new(ClientShared {
            socket,
            peer,
            state: Mutex::new(ClientIo {
                dtls,
                connected: false,
                dead: None,
                inbox: VecDeque::new(),
                callback: None,
                next_wake: Instant::now(),
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let receiver = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("minidtls-client-rx".to_string())
                .spawn(move || shared.receive_loop())
                .map_err(|e| Error::InternalError(format!("spawn receiver: {}", e)))?
        };

        let endpoint = ClientEndpoint {
            shared,
            receiver: Some(receiver),
            receive_timeout,
        };

        endpoint.wait_connected(connect_timeout)?;
        Ok(endpoint)
    }

    fn wait_connected(&self, connect_timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + connect_timeout;
        let mut io = self.shared.state.lock().expect("client endpoint poisoned");

        loop {
            if io.connected {
                return Ok(());
            }
            if let Some(reason) = &io.dead {
                return Err(Error::HandshakeFailure(reason.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("connect"));
            }
            let (next, _) = self
                .shared
                .cond
                .wait_timeout(io, deadline - now)
                .expect("client endpoint poisoned");
            io = next;
        }
    }

    /// Send application data to the peer.
    pub fn send(&self, data: &[u8]) -> Result<(), Error> {
        let mut io = self.shared.state.lock().expect("client endpoint poisoned");
        if let Some(reason) = &io.dead {
            return Err(Error::InternalError(reason.clone()));
        }
        io.dtls.send_application_data(data)?;
        self.shared.drain_and_deliver(io);
        Ok(())
    }

    /// Receive one datagram's plaintext, waiting up to the configured
    /// receive timeout. Not available once a data callback is installed.
    pub fn receive(&self) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + self.receive_timeout;
        let mut io = self.shared.state.lock().expect("client endpoint poisoned");

        loop {
            if let Some(data) = io.inbox.pop_front() {
                return Ok(data);
            }
            if let Some(reason) = &io.dead {
                return Err(Error::InternalError(reason.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("receive"));
            }
            let (next, _) = self
                .shared
                .cond
                .wait_timeout(io, deadline - now)
                .expect("client endpoint poisoned");
            io = next;
        }
    }

    /// Deliver received plaintext through a callback instead of
    /// [`receive`](Self::receive). Queued data is flushed immediately.
    pub fn set_data_callback(&self, callback: impl Fn(SocketAddr, &[u8]) + Send + Sync + 'static) {
        let callback: DataCallback = Arc::new(callback);

        let queued: Vec<Vec<u8>> = {
            let mut io = self.shared.state.lock().expect("client endpoint poisoned");
            io.callback = Some(callback.clone());
            io.inbox.drain(..).collect()
        };

        for data in queued {
            callback(self.shared.peer, &data);
        }
    }

    /// The local socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.shared
            .socket
            .local_addr()
            .map_err(|e| Error::InternalError(e.to_string()))
    }

    /// Best-effort close_notify, then release the receiver thread.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        {
            let mut io = self.shared.state.lock().expect("client endpoint poisoned");
            io.dtls.close();
            let _ = self.shared.drain(&mut io);
        }
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
    }
}

impl Drop for ClientEndpoint {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.close_inner();
        }
    }
}

// ======================================================================
// Server endpoint

enum Job {
    Packet(SocketAddr, Vec<u8>),
    Timeout(SocketAddr),
}

struct SessionHandle {
    peer: SocketAddr,
    state: Mutex<Server>,
    next_wake: Mutex<Instant>,
}

struct ServerShared {
    socket: UdpSocket,
    config: Arc<Config>,
    cookie_secret: [u8; 32],
    sessions: Mutex<HashMap<SocketAddr, Arc<SessionHandle>>>,
    callback: Mutex<Option<DataCallback>>,
    shutdown: AtomicBool,
}

impl ServerShared {
    /// Drive one session under its lock and flush its output.
    fn run_session(&self, session: &SessionHandle, job: Job) {
        let mut server = session.state.lock().expect("session poisoned");

        let result = match job {
            Job::Packet(_, datagram) => server.handle_packet(&datagram),
            Job::Timeout(_) => server.handle_timeout(Instant::now()),
        };
        if let Err(e) = result {
            debug!("session {} ended: {}", session.peer, e);
        }

        let received = self.drain_session(session, &mut server);

        let closed = server.is_closed();
        drop(server);

        if closed {
            self.sessions
                .lock()
                .expect("registry poisoned")
                .remove(&session.peer);
        }

        self.deliver(session.peer, received);
    }

    /// Flush one session's output while holding its lock. Returns received
    /// plaintext; the caller delivers it after releasing the lock (the
    /// data callback may call back into `send`).
    fn drain_session(&self, session: &SessionHandle, server: &mut Server) -> Vec<Vec<u8>> {
        let now = Instant::now();

        // Arm the current flight's timer so freshly queued records are
        // released in this pass.
        if let Err(e) = server.handle_timeout(now) {
            debug!("session {} timer: {}", session.peer, e);
        }

        let mut received = Vec::new();
        loop {
            match server.poll_output(now) {
                Output::Packet(packet) => {
                    if let Err(e) = self.socket.send_to(&packet, session.peer) {
                        debug!("udp send to {} failed: {}", session.peer, e);
                    }
                }
                Output::Connected => {
                    debug!("session {} established", session.peer);
                }
                Output::PeerCert(_) => {}
                Output::ApplicationData(data) => received.push(data),
                Output::Timeout(at) => {
                    *session.next_wake.lock().expect("session poisoned") = at;
                    break;
                }
            }
        }
        received
    }

    fn deliver(&self, peer: SocketAddr, received: Vec<Vec<u8>>) {
        if received.is_empty() {
            return;
        }
        let callback = self.callback.lock().expect("callback poisoned").clone();
        if let Some(callback) = callback {
            for data in received {
                callback(peer, &data);
            }
        }
    }

    /// Earliest pending session deadline, for the receive loop's wait.
    fn next_session_wake(&self) -> Instant {
        let sessions = self.sessions.lock().expect("registry poisoned");
        let mut earliest = Instant::now() + MAX_SOCKET_WAIT;
        for session in sessions.values() {
            let wake = *session.next_wake.lock().expect("session poisoned");
            earliest = earliest.min(wake);
        }
        earliest
    }

    fn due_sessions(&self, now: Instant) -> Vec<SocketAddr> {
        let sessions = self.sessions.lock().expect("registry poisoned");
        sessions
            .values()
            .filter(|s| *s.next_wake.lock().expect("session poisoned") <= now)
            .map(|s| s.peer)
            .collect()
    }

    fn receive_loop(&self, jobs: mpsc::Sender<Job>) {
        let mut buf = vec![0u8; 65_535];

        while !self.shutdown.load(Ordering::Acquire) {
            let wait = clamp_wait(self.next_session_wake(), Instant::now());
            if self.socket.set_read_timeout(Some(wait)).is_err() {
                break;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    if self.accept_datagram(peer, &buf[..n]) {
                        let _ = jobs.send(Job::Packet(peer, buf[..n].to_vec()));
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if is_transient_recv_error(e.kind()) => {
                    trace!("suppressing ICMP-induced socket error: {}", e);
                }
                Err(e) => {
                    warn!("server receive loop ending: {}", e);
                    break;
                }
            }

            let now = Instant::now();
            for peer in self.due_sessions(now) {
                let _ = jobs.send(Job::Timeout(peer));
            }
        }
    }

    /// Route a datagram: known peers go to their session; unknown peers
    /// pass the stateless cookie gate before a session is created.
    /// Returns true when the datagram should be dispatched to a worker.
    fn accept_datagram(&self, peer: SocketAddr, datagram: &[u8]) -> bool {
        if self
            .sessions
            .lock()
            .expect("registry poisoned")
            .contains_key(&peer)
        {
            return true;
        }

        let verdict = stateless_cookie_check(
            datagram,
            &self.cookie_secret,
            peer.to_string().as_bytes(),
            self.config.maximum_version(),
        );
        match verdict {
            StatelessVerdict::Reply(reply) => {
                trace!("hello verify for {}", peer);
                if let Err(e) = self.socket.send_to(&reply, peer) {
                    debug!("udp send to {} failed: {}", peer, e);
                }
                false
            }
            StatelessVerdict::Accept => {
                debug!("cookie verified, creating session for {}", peer);
                let mut server = Server::with_cookie_secret(
                    self.config.clone(),
                    peer.to_string(),
                    self.cookie_secret,
                    true,
                );
                server.set_mtu(self.config.mtu_for(peer.is_ipv4()));

                let session = Arc::new(SessionHandle {
                    peer,
                    state: Mutex::new(server),
                    next_wake: Mutex::new(Instant::now()),
                });
                self.sessions
                    .lock()
                    .expect("registry poisoned")
                    .insert(peer, session);
                true
            }
            StatelessVerdict::Drop => {
                trace!("ignoring datagram from unknown peer {}", peer);
                false
            }
        }
    }

    fn worker_loop(&self, jobs: &Mutex<mpsc::Receiver<Job>>) {
        loop {
            let job = {
                let receiver = jobs.lock().expect("job queue poisoned");
                receiver.recv()
            };
            let Ok(job) = job else {
                // Receive loop is gone; shut down.
                return;
            };

            let peer = match &job {
                Job::Packet(peer, _) => *peer,
                Job::Timeout(peer) => *peer,
            };

            let session = self
                .sessions
                .lock()
                .expect("registry poisoned")
                .get(&peer)
                .cloned();

            if let Some(session) = session {
                self.run_session(&session, job);
            }
        }
    }
}

/// A blocking DTLS server bound to a UDP socket, multiplexing sessions by
/// peer address across a worker pool.
pub struct ServerEndpoint {
    shared: Arc<ServerShared>,
    receiver: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerEndpoint {
    /// Bind to `addr` and start serving handshakes.
    pub fn bind(config: Arc<Config>, addr: SocketAddr) -> Result<ServerEndpoint, Error> {
        let socket = UdpSocket::bind(addr)
            .map_err(|e| Error::InternalError(format!("udp bind: {}", e)))?;

        let mut cookie_secret = [0u8; 32];
        OsRng.fill_bytes(&mut cookie_secret);

        let shared = Arc::new(ServerShared {
            socket,
            config: config.clone(),
            cookie_secret,
            sessions: Mutex::new(HashMap::new()),
            callback: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));

        let mut workers = Vec::with_capacity(config.workers());
        for i in 0..config.workers() {
            let shared = shared.clone();
            let jobs_rx = jobs_rx.clone();
            let worker = std::thread::Builder::new()
                .name(format!("minidtls-worker-{}", i))
                .spawn(move || shared.worker_loop(&jobs_rx))
                .map_err(|e| Error::InternalError(format!("spawn worker: {}", e)))?;
            workers.push(worker);
        }

        let receiver = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("minidtls-server-rx".to_string())
                .spawn(move || shared.receive_loop(jobs_tx))
                .map_err(|e| Error::InternalError(format!("spawn receiver: {}", e)))?
        };

        Ok(ServerEndpoint {
            shared,
            receiver: Some(receiver),
            workers,
        })
    }

    /// Install the `(peer, plaintext)` callback for received data.
    pub fn set_data_callback(
        &self,
        callback: impl Fn(SocketAddr, &[u8]) + Send + Sync + 'static,
    ) {
        *self.shared.callback.lock().expect("callback poisoned") = Some(Arc::new(callback));
    }

    /// Send application data to an established peer session.
    pub fn send(&self, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        let session = self
            .shared
            .sessions
            .lock()
            .expect("registry poisoned")
            .get(&peer)
            .cloned()
            .ok_or_else(|| Error::UnexpectedMessage(format!("no session for {}", peer)))?;

        let mut server = session.state.lock().expect("session poisoned");
        server.send_application_data(data)?;
        let received = self.shared.drain_session(&session, &mut server);
        drop(server);
        self.shared.deliver(peer, received);
        Ok(())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().expect("registry poisoned").len()
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.shared
            .socket
            .local_addr()
            .map_err(|e| Error::InternalError(e.to_string()))
    }

    /// Close every session (best-effort close_notify) and stop the pool.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        {
            let sessions: Vec<Arc<SessionHandle>> = self
                .shared
                .sessions
                .lock()
                .expect("registry poisoned")
                .values()
                .cloned()
                .collect();
            for session in sessions {
                let mut server = session.state.lock().expect("session poisoned");
                server.close();
                let _ = self.shared.drain_session(&session, &mut server);
            }
            self.shared.sessions.lock().expect("registry poisoned").clear();
        }

        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for ServerEndpoint {
    fn drop(&mut self) {
        if self.receiver.is_some() {
            self.close_inner();
        }
    }
}
