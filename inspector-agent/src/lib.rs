//! # Inspector Agent
//!
//! Bridges a remote debugging frontend to a [`ProtocolEngine`] that must only
//! run on the host program's own thread.
//!
//! Two threads cooperate:
//!
//! - the **IO thread** accepts connections, answers discovery requests, and
//!   moves whole protocol messages between the WebSocket session and two
//!   [`Mailbox`]es;
//! - the **control thread** (the host program) owns the [`Agent`] and the
//!   engine, and drains the inbound mailbox whenever it pumps tasks or sits
//!   in the pause loop.
//!
//! ```text
//!  frontend <-ws-> IO thread --inbound mailbox + ControlTask--> control thread
//!                            <--outbound mailbox + IO wake----
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use inspector_agent::{Agent, AgentConfig, Channel, ProtocolEngine};
//!
//! struct Echo(Option<Channel>);
//!
//! impl ProtocolEngine for Echo {
//!     fn connect_frontend(&mut self, channel: Channel) { self.0 = Some(channel); }
//!     fn dispatch_message(&mut self, message: &str) {
//!         if let Some(channel) = &self.0 { channel.send_to_frontend(message); }
//!     }
//!     fn disconnect_frontend(&mut self) { self.0 = None; }
//! }
//!
//! let agent = Agent::new(AgentConfig::default(), Echo(None));
//! agent.start().unwrap();
//! loop {
//!     agent.pump_tasks();
//!     # break;
//! }
//! agent.wait_for_disconnect();
//! agent.stop().unwrap();
//! ```

mod agent;
mod bridge;
mod discovery;
mod error;
mod mailbox;
mod pause;
mod server;

pub use agent::{Agent, AgentConfig, Channel, ProtocolEngine, WeakAgent};
pub use discovery::{frontend_url, websocket_url, DiscoveryInfo};
pub use error::AgentError;
pub use mailbox::Mailbox;
pub use pause::PauseState;
pub use server::IO_POLL_INTERVAL;

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 9229;

/// The only path a WebSocket upgrade is accepted on
pub const CONTROL_PATH: &str = "/node";
