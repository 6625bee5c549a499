//! Inspector IO loop: owns the listening socket and the single live session

use crate::bridge::{ControlTask, ControlWaker, IoWaker};
use crate::discovery::{self, DiscoveryInfo};
use crate::mailbox::Mailbox;
use crate::{AgentError, CONTROL_PATH};
use inspector_transport::socket::HANDSHAKE_TIMEOUT;
use inspector_transport::{
    HeadPoll, Incoming, Listener, PendingConnection, RecvEvent, TransportError,
    WebSocketConnection,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long one loop iteration may block on the session socket
pub const IO_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Legacy wait-mode trigger, matched against the raw message text
const RUN_TRIGGER: &str = "\"Runtime.run\"";

/// State shared between the control thread and the IO thread
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub inbound: Mailbox,
    pub outbound: Mailbox,
    pub io_waker: IoWaker,
    pub shutdown: AtomicBool,
    /// Clone of the session socket so `stop` can force-close it
    pub session_socket: Mutex<Option<TcpStream>>,
}

impl Shared {
    pub fn session_socket(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.session_socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Shut down the live session socket, unblocking any pending read
    pub fn force_close_session(&self) {
        if let Some(stream) = self.session_socket().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Reported back to `Agent::start` while it waits
#[derive(Debug)]
pub(crate) enum StartupEvent {
    Listening(SocketAddr),
    FrontendReady,
    Failed(AgentError),
}

pub(crate) struct IoLoop {
    shared: Arc<Shared>,
    control: ControlWaker,
    startup: Sender<StartupEvent>,
    discovery: DiscoveryInfo,
    bind_addr: String,
    wait_for_frontend: bool,
    session: Option<WebSocketConnection>,
    /// Accepted connections whose request head has not fully arrived
    incoming: Vec<Incoming>,
    advertised: String,
}

impl IoLoop {
    pub fn new(
        shared: Arc<Shared>,
        control: ControlWaker,
        startup: Sender<StartupEvent>,
        discovery: DiscoveryInfo,
        bind_addr: String,
        wait_for_frontend: bool,
    ) -> Self {
        IoLoop {
            shared,
            control,
            startup,
            discovery,
            advertised: bind_addr.clone(),
            bind_addr,
            wait_for_frontend,
            session: None,
            incoming: Vec::new(),
        }
    }

    /// Run the loop until the shutdown flag is raised
    pub fn run(mut self) {
        let listener = match Listener::bind(&self.bind_addr) {
            Ok(l) => l,
            Err(e) => {
                let _ = self.startup.send(StartupEvent::Failed(AgentError::Bind {
                    addr: self.bind_addr.clone(),
                    source: e,
                }));
                return;
            }
        };

        let local = listener.local_addr();
        self.advertised = advertised_host(local);
        info!(addr = %local, "inspector listening");
        print_ready_message(local);
        let _ = self.startup.send(StartupEvent::Listening(local));

        while !self.shared.shutdown.load(Ordering::Acquire) {
            let mut busy = false;

            match listener.poll_accept() {
                Ok(Some((stream, peer))) => {
                    busy = true;
                    self.on_accept(stream, peer);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "accept failed"),
            }
            self.poll_incoming();

            // Blocks for at most IO_POLL_INTERVAL
            self.poll_session();

            if self.shared.io_waker.take() {
                self.flush_outbound();
            }

            if self.session.is_none() && !busy {
                std::thread::sleep(IO_POLL_INTERVAL);
            }
        }

        if self.session.is_some() {
            self.flush_outbound();
            if let Some(conn) = self.session.as_mut() {
                conn.close();
            }
            self.on_session_closed(None);
        }
        info!("inspector IO loop stopped");
    }

    fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        match Incoming::new(stream, peer, HANDSHAKE_TIMEOUT) {
            Ok(incoming) => self.incoming.push(incoming),
            Err(e) => debug!(%peer, error = %e, "cannot track connection"),
        }
    }

    /// Look once at every connection still sending its request head
    fn poll_incoming(&mut self) {
        for incoming in std::mem::take(&mut self.incoming) {
            let peer = incoming.peer_addr();
            match incoming.poll_head() {
                Ok(HeadPoll::Ready(pending)) => self.on_request(pending),
                Ok(HeadPoll::Waiting(incoming)) => self.incoming.push(incoming),
                Err(e) => debug!(%peer, error = %e, "handshake failed"),
            }
        }
    }

    /// Classify a complete request: discovery, upgrade, or junk
    fn on_request(&mut self, pending: PendingConnection) {
        let peer = pending.peer_addr();
        let head = pending.head();
        if head.method != "GET" {
            debug!(%peer, method = %head.method, "rejecting non-GET request");
            pending.reject();
            return;
        }

        if head.is_upgrade() {
            if self.session.is_some() {
                // At most one session; the newcomer is dropped without a reply
                debug!(%peer, "ignoring upgrade while a session is active");
                pending.reject();
                return;
            }
            match pending.upgrade(CONTROL_PATH) {
                Ok(conn) => self.on_session(conn),
                Err(e) => debug!(%peer, error = %e, "upgrade rejected"),
            }
            return;
        }

        let path = head.path.clone();
        let host = head
            .host()
            .map(str::to_string)
            .unwrap_or_else(|| self.advertised.clone());
        match self.discovery.respond(&path, &host) {
            Some(response) => {
                trace!(%peer, %path, "discovery request");
                if let Err(e) = pending.respond(&response) {
                    debug!(%peer, error = %e, "discovery response failed");
                }
            }
            None => {
                debug!(%peer, %path, "rejecting unknown discovery path");
                pending.reject();
            }
        }
    }

    fn on_session(&mut self, conn: WebSocketConnection) {
        let peer = conn.peer_addr();
        if let Err(e) = conn.set_poll_interval(IO_POLL_INTERVAL) {
            warn!(%peer, error = %e, "cannot configure session socket");
            return;
        }
        match conn.shutdown_handle() {
            Ok(socket) => *self.shared.session_socket() = Some(socket),
            Err(e) => warn!(%peer, error = %e, "session cannot be force-closed"),
        }
        info!(%peer, "inspector session attached");
        self.session = Some(conn);
        self.control.post(ControlTask::SetConnected(true));
    }

    fn poll_session(&mut self) {
        let Some(conn) = self.session.as_mut() else {
            return;
        };
        match conn.poll_recv() {
            Ok(RecvEvent::Text(text)) => self.on_remote_data(text),
            Ok(RecvEvent::Idle) => {}
            Ok(RecvEvent::Closed) => self.on_session_closed(None),
            Err(e) => self.on_session_closed(Some(e)),
        }
    }

    fn on_remote_data(&mut self, text: String) {
        trace!(len = text.len(), "inbound message");
        let releases_start = self.wait_for_frontend && is_run_trigger(&text);
        self.shared.inbound.push(text);

        if releases_start {
            self.wait_for_frontend = false;
            let _ = self.startup.send(StartupEvent::FrontendReady);
        }
        self.control.post(ControlTask::DispatchMessages);
    }

    /// Tear down the session after EOF, a close frame or a read error.
    /// A session that is already gone produces no second disconnect.
    fn on_session_closed(&mut self, error: Option<TransportError>) {
        let Some(conn) = self.session.take() else {
            return;
        };
        let peer = conn.peer_addr();
        match error {
            Some(e) => debug!(%peer, error = %e, "inspector session failed"),
            None => info!(%peer, "inspector session closed"),
        }
        drop(conn);
        self.shared.session_socket().take();
        self.control.post(ControlTask::SetConnected(false));
    }

    fn flush_outbound(&mut self) {
        let Some(conn) = self.session.as_mut() else {
            // Kept queued until a session can take them
            return;
        };
        for message in self.shared.outbound.drain_all() {
            // Write failures are not retried
            if let Err(e) = conn.send_text(&message) {
                debug!(error = %e, "dropping outbound message");
            }
        }
    }
}

fn is_run_trigger(text: &str) -> bool {
    text.contains(RUN_TRIGGER)
}

/// `host:port` clients should use; wildcard binds advertise loopback
pub(crate) fn advertised_host(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port()).to_string()
}

pub(crate) fn print_ready_message(addr: SocketAddr) {
    let host = advertised_host(addr);
    eprintln!(
        "Debugger listening on {}. To start debugging, open {}",
        discovery::websocket_url(&host),
        discovery::frontend_url(&host)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ControlQueue;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;
    use tungstenite::Message;

    fn test_loop(wait_for_frontend: bool) -> (IoLoop, ControlQueue, mpsc::Receiver<StartupEvent>) {
        let (waker, queue) = ControlQueue::new();
        let (startup_tx, startup_rx) = mpsc::channel();
        let io_loop = IoLoop::new(
            Arc::new(Shared::default()),
            waker,
            startup_tx,
            DiscoveryInfo::current(),
            "127.0.0.1:0".to_string(),
            wait_for_frontend,
        );
        (io_loop, queue, startup_rx)
    }

    fn drain(queue: &ControlQueue) -> Vec<ControlTask> {
        std::iter::from_fn(|| queue.try_next()).collect()
    }

    /// Accept `stream` and poll until its request has been handled
    fn admit(io_loop: &mut IoLoop, stream: TcpStream, peer: SocketAddr) {
        io_loop.on_accept(stream, peer);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !io_loop.incoming.is_empty() {
            assert!(Instant::now() < deadline, "request head never completed");
            io_loop.poll_incoming();
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Attach a real tungstenite client to `io_loop` and return the client side
    fn attach_client(
        io_loop: &mut IoLoop,
    ) -> tungstenite::WebSocket<tungstenite::stream::MaybeTlsStream<TcpStream>> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/node", listener.local_addr().unwrap());
        let client = thread::spawn(move || tungstenite::connect(url.as_str()).unwrap().0);
        let (stream, peer) = listener.accept().unwrap();
        admit(io_loop, stream, peer);
        client.join().unwrap()
    }

    #[test]
    fn test_run_trigger_needs_quoted_method() {
        assert!(is_run_trigger(r#"{"id":3,"method":"Runtime.run"}"#));
        assert!(!is_run_trigger(r#"{"id":3,"method":"Runtime.runIfWaitingForDebugger"}"#));
        assert!(!is_run_trigger("Runtime.run"));
    }

    #[test]
    fn test_advertised_host_replaces_wildcard() {
        let addr: SocketAddr = "0.0.0.0:9229".parse().unwrap();
        assert_eq!(advertised_host(addr), "127.0.0.1:9229");
        let addr: SocketAddr = "[::]:9229".parse().unwrap();
        assert_eq!(advertised_host(addr), "[::1]:9229");
        let addr: SocketAddr = "10.0.0.2:1234".parse().unwrap();
        assert_eq!(advertised_host(addr), "10.0.0.2:1234");
    }

    #[test]
    fn test_inbound_data_queues_and_wakes() {
        let (mut io_loop, queue, _startup) = test_loop(false);
        io_loop.on_remote_data("one".to_string());
        io_loop.on_remote_data("two".to_string());
        assert_eq!(io_loop.shared.inbound.drain_all(), vec!["one", "two"]);
        assert_eq!(
            drain(&queue),
            vec![ControlTask::DispatchMessages, ControlTask::DispatchMessages]
        );
    }

    #[test]
    fn test_wait_mode_released_once_by_run_trigger() {
        let (mut io_loop, _queue, startup) = test_loop(true);
        io_loop.on_remote_data(r#"{"id":1,"method":"Debugger.enable"}"#.to_string());
        assert!(startup.try_recv().is_err());
        io_loop.on_remote_data(r#"{"id":2,"method":"Runtime.run"}"#.to_string());
        assert!(matches!(startup.try_recv(), Ok(StartupEvent::FrontendReady)));
        io_loop.on_remote_data(r#"{"id":3,"method":"Runtime.run"}"#.to_string());
        assert!(startup.try_recv().is_err());
    }

    #[test]
    fn test_close_without_session_posts_nothing() {
        let (mut io_loop, queue, _startup) = test_loop(false);
        io_loop.on_session_closed(None);
        io_loop.on_session_closed(Some(TransportError::ConnectionClosed));
        assert!(drain(&queue).is_empty());
    }

    #[test]
    fn test_second_eof_disconnects_once() {
        let (mut io_loop, queue, _startup) = test_loop(false);
        let _client = attach_client(&mut io_loop);
        assert!(io_loop.session.is_some());
        assert!(io_loop.shared.session_socket().is_some());

        io_loop.on_session_closed(None);
        io_loop.on_session_closed(None);

        assert!(io_loop.shared.session_socket().is_none());
        assert_eq!(
            drain(&queue),
            vec![ControlTask::SetConnected(true), ControlTask::SetConnected(false)]
        );
    }

    #[test]
    fn test_second_upgrade_leaves_first_session() {
        let (mut io_loop, queue, _startup) = test_loop(false);
        let mut first = attach_client(&mut io_loop);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/node", listener.local_addr().unwrap());
        let second = thread::spawn(move || tungstenite::connect(url.as_str()).is_err());
        let (stream, peer) = listener.accept().unwrap();
        admit(&mut io_loop, stream, peer);
        assert!(second.join().unwrap(), "second client must not be upgraded");

        first.send(Message::Text("still here".to_string())).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while io_loop.shared.inbound.is_empty() {
            assert!(Instant::now() < deadline);
            io_loop.poll_session();
        }
        assert_eq!(io_loop.shared.inbound.drain_all(), vec!["still here"]);

        io_loop.shared.outbound.push("reply");
        io_loop.flush_outbound();
        assert_eq!(first.read().unwrap(), Message::Text("reply".to_string()));

        assert_eq!(
            drain(&queue),
            vec![ControlTask::SetConnected(true), ControlTask::DispatchMessages]
        );
    }

    #[test]
    fn test_silent_connection_does_not_stall_session() {
        let (mut io_loop, _queue, _startup) = test_loop(false);
        let mut client = attach_client(&mut io_loop);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _silent = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        let started = Instant::now();
        io_loop.on_accept(stream, peer);
        io_loop.poll_incoming();
        assert_eq!(io_loop.incoming.len(), 1);

        client.send(Message::Text("ping".to_string())).unwrap();
        while io_loop.shared.inbound.is_empty() {
            assert!(started.elapsed() < Duration::from_secs(1), "session stalled");
            io_loop.poll_incoming();
            io_loop.poll_session();
        }
        assert_eq!(io_loop.shared.inbound.drain_all(), vec!["ping"]);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(io_loop.incoming.len(), 1);
    }

    #[test]
    fn test_silent_connection_dropped_after_deadline() {
        let (mut io_loop, _queue, _startup) = test_loop(false);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _silent = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();

        io_loop
            .incoming
            .push(Incoming::new(stream, peer, Duration::from_millis(20)).unwrap());
        io_loop.poll_incoming();
        assert_eq!(io_loop.incoming.len(), 1);

        thread::sleep(Duration::from_millis(40));
        io_loop.poll_incoming();
        assert!(io_loop.incoming.is_empty());
    }
}
