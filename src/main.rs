mod engine;
mod logger;
mod parse_args;
mod program;

use std::rc::Rc;

use inspector_agent::{Agent, AgentConfig, DiscoveryInfo};
use parse_args::parse_args;
use program::{Program, ProgramState};
use tracing::info;

use engine::DemoEngine;

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logger::init(args.verbosity, args.log_file.as_deref()) {
        eprintln!(
            "Failed to open log file '{}': {}",
            args.log_file.as_deref().unwrap_or_default(),
            e
        );
        std::process::exit(1);
    }
    if let Some(path) = &args.log_file {
        eprintln!("Logging to: {}", path);
    }

    let defaults = AgentConfig::default();
    let mut discovery = DiscoveryInfo::current();
    if let Some(title) = args.title {
        discovery.title = title;
    }
    let config = AgentConfig {
        host: args.host.unwrap_or(defaults.host),
        port: args.port.unwrap_or(defaults.port),
        wait_for_frontend: args.wait,
        discovery,
    };

    let state = Rc::new(ProgramState::default());
    let agent = Agent::new(config, DemoEngine::new(state.clone()));

    if args.wait {
        eprintln!("Waiting for the frontend to send Runtime.run...");
    }
    // A bind failure aborts inside start
    let addr = match agent.start() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Failed to start inspector: {}", e);
            std::process::exit(1);
        }
    };
    info!(%addr, "inspector ready");

    let program = Program::new(agent, state, args.ticks, args.breakpoints);
    if let Err(e) = program.run() {
        eprintln!("Inspector error: {}", e);
        std::process::exit(1);
    }
}
