//! The control-thread half of the inspector.
//!
//! An [`Agent`] lives on the thread that runs the host program. It owns the
//! protocol engine and only touches it from that thread: inbound messages and
//! connection changes arrive as `ControlTask`s posted by the IO thread and
//! are applied when the host calls [`Agent::pump_tasks`] or while it is parked
//! in [`Agent::run_message_loop_on_pause`].

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::bridge::{ControlQueue, ControlTask, ControlWaker};
use crate::discovery::DiscoveryInfo;
use crate::pause::{PauseController, PauseState};
use crate::server::{self, IoLoop, Shared, StartupEvent};
use crate::{AgentError, DEFAULT_PORT};

/// Something that speaks the debugging protocol on the control thread
pub trait ProtocolEngine {
    /// A frontend attached. `channel` stays usable until `disconnect_frontend`.
    fn connect_frontend(&mut self, channel: Channel);

    /// One complete inbound message, in arrival order
    fn dispatch_message(&mut self, message: &str);

    /// The frontend went away; drop the channel
    fn disconnect_frontend(&mut self);
}

/// Handle the engine uses to reach the frontend
#[derive(Debug, Clone)]
pub struct Channel {
    shared: Arc<Shared>,
    pause: Rc<PauseController>,
}

impl Channel {
    /// Queue a message for the frontend and wake the IO thread
    pub fn send_to_frontend(&self, message: impl Into<String>) {
        self.shared.outbound.push(message);
        self.shared.io_waker.wake();
    }

    /// Make the nested pause loop return once the current task finishes
    pub fn quit_message_loop_on_pause(&self) {
        self.pause.quit();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub host: String,
    pub port: u16,
    /// Hold `start` until the frontend sends `Runtime.run`
    pub wait_for_frontend: bool,
    pub discovery: DiscoveryInfo,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            wait_for_frontend: false,
            discovery: DiscoveryInfo::current(),
        }
    }
}

impl AgentConfig {
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

struct AgentInner {
    config: AgentConfig,
    shared: Arc<Shared>,
    control_waker: ControlWaker,
    control: ControlQueue,
    engine: RefCell<Box<dyn ProtocolEngine>>,
    pause: Rc<PauseController>,
    connected: Cell<bool>,
    dispatching: Cell<bool>,
    shutting_down: Cell<bool>,
    local_addr: Cell<Option<SocketAddr>>,
    io_thread: RefCell<Option<JoinHandle<()>>>,
}

/// Inspector agent bound to the control thread.
///
/// Cloning yields another handle to the same agent.
#[derive(Clone)]
pub struct Agent {
    inner: Rc<AgentInner>,
}

/// Non-owning handle, for engines that need to call back into the agent.
///
/// The engine is moved into [`Agent::new`] before any handle exists, so it
/// holds a shared slot that the host fills once the agent is built:
///
/// ```no_run
/// # use std::cell::RefCell;
/// # use std::rc::Rc;
/// # use inspector_agent::{Agent, AgentConfig, Channel, ProtocolEngine, WeakAgent};
/// struct Engine {
///     agent: Rc<RefCell<Option<WeakAgent>>>,
/// }
///
/// impl ProtocolEngine for Engine {
///     fn connect_frontend(&mut self, _channel: Channel) {}
///     fn dispatch_message(&mut self, _message: &str) {
///         let agent = self.agent.borrow().as_ref().and_then(WeakAgent::upgrade);
///         if let Some(agent) = agent {
///             agent.post_messages();
///         }
///     }
///     fn disconnect_frontend(&mut self) {}
/// }
///
/// let slot = Rc::new(RefCell::new(None));
/// let agent = Agent::new(AgentConfig::default(), Engine { agent: slot.clone() });
/// *slot.borrow_mut() = Some(agent.downgrade());
/// ```
#[derive(Clone)]
pub struct WeakAgent {
    inner: Weak<AgentInner>,
}

impl WeakAgent {
    pub fn upgrade(&self) -> Option<Agent> {
        self.inner.upgrade().map(|inner| Agent { inner })
    }
}

impl Agent {
    pub fn new<E: ProtocolEngine + 'static>(config: AgentConfig, engine: E) -> Self {
        let (control_waker, control) = ControlQueue::new();
        Agent {
            inner: Rc::new(AgentInner {
                config,
                shared: Arc::new(Shared::default()),
                control_waker,
                control,
                engine: RefCell::new(Box::new(engine)),
                pause: Rc::new(PauseController::new()),
                connected: Cell::new(false),
                dispatching: Cell::new(false),
                shutting_down: Cell::new(false),
                local_addr: Cell::new(None),
                io_thread: RefCell::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakAgent {
        WeakAgent {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Start the IO thread. A bind failure prints
    /// `Unable to open devtools socket: <reason>` and aborts the process.
    pub fn start(&self) -> Result<SocketAddr, AgentError> {
        match self.try_start() {
            Err(AgentError::Bind { source, .. }) => {
                eprintln!("Unable to open devtools socket: {}", source);
                std::process::abort();
            }
            other => other,
        }
    }

    /// Start the IO thread and return the bound address.
    ///
    /// In wait mode this blocks until the frontend sends `Runtime.run`, then
    /// marks the session connected and dispatches everything received so far.
    pub fn try_start(&self) -> Result<SocketAddr, AgentError> {
        let inner = &self.inner;
        if let Some(addr) = inner.local_addr.get() {
            return Err(AgentError::AlreadyStarted(addr));
        }

        inner.shared.shutdown.store(false, Ordering::Release);
        inner.shutting_down.set(false);

        let (startup_tx, startup_rx) = mpsc::channel();
        let io_loop = IoLoop::new(
            inner.shared.clone(),
            inner.control_waker.clone(),
            startup_tx,
            inner.config.discovery.clone(),
            inner.config.bind_addr(),
            inner.config.wait_for_frontend,
        );
        let handle = thread::Builder::new()
            .name("inspector-io".to_string())
            .spawn(move || io_loop.run())
            .map_err(AgentError::Spawn)?;

        let addr = match startup_rx.recv() {
            Ok(StartupEvent::Listening(addr)) => addr,
            Ok(StartupEvent::Failed(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Ok(StartupEvent::FrontendReady) | Err(_) => {
                inner.shared.shutdown.store(true, Ordering::Release);
                let _ = handle.join();
                return Err(AgentError::StartupAborted);
            }
        };
        *inner.io_thread.borrow_mut() = Some(handle);
        inner.local_addr.set(Some(addr));
        info!(%addr, wait = inner.config.wait_for_frontend, "inspector agent started");

        if inner.config.wait_for_frontend {
            loop {
                match startup_rx.recv() {
                    Ok(StartupEvent::FrontendReady) => break,
                    Ok(_) => continue,
                    Err(_) => {
                        warn!("IO thread stopped before the frontend was ready");
                        return Ok(addr);
                    }
                }
            }
            debug!("frontend sent Runtime.run, resuming start");
            self.set_connected(true);
            self.post_messages();
        }
        Ok(addr)
    }

    /// Stop the IO thread, closing any live session
    pub fn stop(&self) -> Result<(), AgentError> {
        let inner = &self.inner;
        let Some(handle) = inner.io_thread.borrow_mut().take() else {
            return Ok(());
        };
        inner.shutting_down.set(true);
        inner.shared.shutdown.store(true, Ordering::Release);
        inner.shared.force_close_session();

        let joined = handle.join();
        inner.local_addr.set(None);
        info!("inspector agent stopped");

        // Apply the disconnect the IO thread posted on its way out
        self.pump_tasks();
        joined.map_err(|_| AgentError::IoThreadPanicked)
    }

    pub fn is_started(&self) -> bool {
        self.inner.local_addr.get().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn pause_state(&self) -> PauseState {
        self.inner.pause.state()
    }

    /// True when the IO thread has posted work that `pump_tasks` would run.
    /// Cheap enough to poll from a hot loop.
    pub fn interrupt_requested(&self) -> bool {
        self.inner.control.interrupt_requested()
    }

    /// Run every queued control task and return how many ran.
    /// Does nothing while a dispatch is in progress.
    pub fn pump_tasks(&self) -> usize {
        if self.inner.dispatching.get() {
            return 0;
        }
        let mut ran = 0;
        while let Some(task) = self.inner.control.try_next() {
            self.run_task(task);
            ran += 1;
        }
        ran
    }

    /// Dispatch all inbound messages to the engine, oldest first.
    ///
    /// Re-entrant calls made while dispatching return at once; whatever they
    /// would have delivered stays queued for the outer or a later call.
    pub fn post_messages(&self) {
        let inner = &self.inner;
        if inner.dispatching.replace(true) {
            return;
        }

        let messages = inner.shared.inbound.drain_all();
        if !messages.is_empty() {
            let mut engine = inner.engine.borrow_mut();
            for message in &messages {
                engine.dispatch_message(message);
            }
        }
        inner.dispatching.set(false);

        // Replies queued by the engine
        inner.shared.io_waker.wake();
    }

    /// Record a connection change. Repeating the current state is a no-op.
    pub fn set_connected(&self, connected: bool) {
        let inner = &self.inner;
        if inner.dispatching.get() {
            // The engine is borrowed; apply once the dispatch unwinds
            inner.control_waker.post(ControlTask::SetConnected(connected));
            return;
        }
        if inner.connected.get() == connected {
            return;
        }
        inner.connected.set(connected);

        if connected {
            info!("frontend connected");
            eprintln!("Debugger attached.");
            let channel = Channel {
                shared: inner.shared.clone(),
                pause: inner.pause.clone(),
            };
            inner.engine.borrow_mut().connect_frontend(channel);
        } else {
            info!("frontend disconnected");
            println!("Debugger detached.");
            if !inner.shutting_down.get() {
                if let Some(addr) = inner.local_addr.get() {
                    server::print_ready_message(addr);
                }
            }
            inner.pause.quit();
            inner.engine.borrow_mut().disconnect_frontend();
        }
    }

    /// Park the control thread, running control tasks as they arrive, until
    /// the engine calls `quit_message_loop_on_pause` or the frontend leaves.
    pub fn run_message_loop_on_pause(&self) {
        let inner = &self.inner;
        if inner.dispatching.get() {
            warn!("pause requested while dispatching a message, ignored");
            return;
        }
        if !inner.pause.enter() {
            return;
        }
        debug!("entering pause loop");

        while let Some(task) = inner.control.wait() {
            self.run_task(task);
            self.pump_tasks();
            if inner.pause.take_quit() {
                break;
            }
        }

        inner.pause.leave();
        debug!("leaving pause loop");
    }

    /// Block until the frontend disconnects. Returns at once if none is attached.
    pub fn wait_for_disconnect(&self) {
        self.inner.shutting_down.set(true);
        if !self.inner.connected.get() {
            return;
        }
        eprintln!("Waiting for the debugger to disconnect...");
        self.run_message_loop_on_pause();
    }

    fn run_task(&self, task: ControlTask) {
        match task {
            ControlTask::DispatchMessages => self.post_messages(),
            ControlTask::SetConnected(connected) => self.set_connected(connected),
        }
    }
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        if let Some(handle) = self.io_thread.get_mut().take() {
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.force_close_session();
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("local_addr", &self.inner.local_addr.get())
            .field("connected", &self.inner.connected.get())
            .field("pause", &self.inner.pause.state())
            .finish()
    }
}
