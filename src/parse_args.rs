const HELP: &str = "\
Inspector Bridge - remote debugger protocol bridge

Runs a small tick-counting program on the main thread and exposes it to a
DevTools-style frontend over a WebSocket.

USAGE:
  inspector-bridge [OPTIONS]

OPTIONS:
  -h, --help            Prints help information
  --host <addr>         Address to listen on (default: 127.0.0.1)
  -p, --port <n>        Port to listen on (default: 9229, 0 picks a free port)
  -w, --wait            Don't run the program until the frontend sends Runtime.run
  --ticks <n>           Stop the program after this many ticks (default: 500)
  -b, --break-at <n>    Pause when the program reaches tick <n> (repeatable)
  --title <s>           Target title shown by discovery clients
  -v, --verbose         Show connections and sessions
  -vv, --debug          Show handshakes, pause loop and task activity
  -vvv, --trace         Show every protocol message
  --log <file>          Write log output to file instead of stderr
";

/// Log level selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Warnings only
    #[default]
    Quiet = 0,
    /// Connections and sessions
    Verbose = 1,
    /// Handshakes, pause loop, control tasks
    Debug = 2,
    /// Every protocol message
    Trace = 3,
}

impl Verbosity {
    /// Filter directive used when `RUST_LOG` is not set
    pub fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "warn,inspector_bridge=info,inspector_agent=info,inspector_transport=info",
            Verbosity::Debug => "info,inspector_bridge=debug,inspector_agent=debug,inspector_transport=debug",
            Verbosity::Trace => "debug,inspector_bridge=trace,inspector_agent=trace,inspector_transport=trace",
        }
    }
}

pub const DEFAULT_TICKS: u64 = 500;

#[derive(Debug)]
pub struct AppArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub wait: bool,
    pub ticks: u64,
    pub breakpoints: Vec<u64>,
    pub title: Option<String>,
    pub verbosity: Verbosity,
    pub log_file: Option<String>,
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let breakpoints: Vec<u64> = pargs.values_from_str(["-b", "--break-at"])?;

    let verbosity = if pargs.contains(["-vvv", "--trace"]) {
        Verbosity::Trace
    } else if pargs.contains(["-vv", "--debug"]) {
        Verbosity::Debug
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let args = AppArgs {
        host: pargs.opt_value_from_str("--host")?,
        port: pargs.opt_value_from_str(["-p", "--port"])?,
        wait: pargs.contains(["-w", "--wait"]),
        ticks: pargs
            .opt_value_from_str("--ticks")?
            .unwrap_or(DEFAULT_TICKS),
        breakpoints,
        title: pargs.opt_value_from_str("--title")?,
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
