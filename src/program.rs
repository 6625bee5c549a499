//! The demo host program: a tick counter driven on the main thread.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use inspector_agent::{Agent, AgentError, Channel};
use tracing::{debug, info};

use crate::engine::{paused_notification, PauseReason};

/// Delay between ticks
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// State the program shares with the protocol engine
#[derive(Debug, Default)]
pub struct ProgramState {
    tick: Cell<u64>,
    pause_requested: Cell<bool>,
    channel: RefCell<Option<Channel>>,
}

impl ProgramState {
    pub fn tick(&self) -> u64 {
        self.tick.get()
    }

    /// Ask the program to pause before its next tick
    pub fn request_pause(&self) {
        self.pause_requested.set(true);
    }

    pub(crate) fn take_pause_request(&self) -> bool {
        self.pause_requested.replace(false)
    }

    pub fn attach(&self, channel: Channel) {
        *self.channel.borrow_mut() = Some(channel);
    }

    pub fn detach(&self) {
        self.channel.borrow_mut().take();
    }

    fn channel(&self) -> Option<Channel> {
        self.channel.borrow().clone()
    }
}

pub struct Program {
    agent: Agent,
    state: Rc<ProgramState>,
    breakpoints: BTreeSet<u64>,
    ticks: u64,
}

impl Program {
    pub fn new(agent: Agent, state: Rc<ProgramState>, ticks: u64, breakpoints: Vec<u64>) -> Self {
        Program {
            agent,
            state,
            breakpoints: breakpoints.into_iter().collect(),
            ticks,
        }
    }

    /// Run every tick, then let an attached frontend finish and stop the agent
    pub fn run(self) -> Result<(), AgentError> {
        info!(ticks = self.ticks, breakpoints = ?self.breakpoints, "program started");

        for tick in 1..=self.ticks {
            self.state.tick.set(tick);

            if self.agent.interrupt_requested() {
                self.agent.pump_tasks();
            }

            if self.breakpoints.contains(&tick) {
                self.pause(PauseReason::Breakpoint);
            } else if self.state.take_pause_request() {
                self.pause(PauseReason::Other);
            }

            std::thread::sleep(TICK_INTERVAL);
        }

        self.agent.pump_tasks();
        println!("Program finished after {} ticks.", self.ticks);
        if self.agent.is_connected() {
            self.agent.wait_for_disconnect();
        }
        self.agent.stop()
    }

    fn pause(&self, reason: PauseReason) {
        let tick = self.state.tick();
        // Clone so the engine can detach while we are parked
        let Some(channel) = self.state.channel() else {
            debug!(tick, ?reason, "no frontend attached, not pausing");
            return;
        };
        info!(tick, ?reason, "program paused");
        channel.send_to_frontend(paused_notification(reason, tick));
        drop(channel);
        self.agent.run_message_loop_on_pause();
        info!(tick, "program resumed");
    }
}
