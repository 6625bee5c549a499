use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use inspector_agent::{Agent, AgentConfig, AgentError, Channel, DiscoveryInfo, ProtocolEngine};
use serde_json::Value;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

type Client = WebSocket<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct Log {
    dispatched: Vec<String>,
    connects: usize,
    disconnects: usize,
}

/// Answers every message with `echo:<message>`; `resume` also ends a pause
struct EchoEngine {
    log: Rc<RefCell<Log>>,
    channel: Option<Channel>,
}

impl ProtocolEngine for EchoEngine {
    fn connect_frontend(&mut self, channel: Channel) {
        self.log.borrow_mut().connects += 1;
        self.channel = Some(channel);
    }

    fn dispatch_message(&mut self, message: &str) {
        self.log.borrow_mut().dispatched.push(message.to_string());
        if let Some(channel) = &self.channel {
            channel.send_to_frontend(format!("echo:{}", message));
            if message == "resume" {
                channel.quit_message_loop_on_pause();
            }
        }
    }

    fn disconnect_frontend(&mut self) {
        self.log.borrow_mut().disconnects += 1;
        self.channel = None;
    }
}

fn config(port: u16, wait_for_frontend: bool) -> AgentConfig {
    AgentConfig {
        host: "127.0.0.1".to_string(),
        port,
        wait_for_frontend,
        discovery: DiscoveryInfo::current(),
    }
}

fn agent_with(config: AgentConfig) -> (Agent, Rc<RefCell<Log>>) {
    let log = Rc::new(RefCell::new(Log::default()));
    let engine = EchoEngine {
        log: log.clone(),
        channel: None,
    };
    (Agent::new(config, engine), log)
}

fn started_agent() -> (Agent, SocketAddr, Rc<RefCell<Log>>) {
    let (agent, log) = agent_with(config(0, false));
    let addr = agent.try_start().unwrap();
    (agent, addr, log)
}

fn pump_until(agent: &Agent, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        agent.pump_tasks();
        if done() {
            return;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(stream, "GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", path, addr).unwrap();
    let mut reply = String::new();
    let _ = stream.read_to_string(&mut reply);
    reply
}

fn http_body(reply: &str) -> &str {
    reply.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tungstenite::connect(format!("ws://{}/node", addr)).unwrap();
    client
}

fn attach(agent: &Agent, addr: SocketAddr) -> Client {
    let client = connect(addr);
    pump_until(agent, || agent.is_connected());
    client
}

fn read_text(client: &mut Client) -> String {
    match client.read().unwrap() {
        Message::Text(text) => text,
        other => panic!("unexpected frame {:?}", other),
    }
}

#[test]
fn test_discovery_endpoints() {
    let (agent, addr, _log) = started_agent();

    let reply = http_get(addr, "/json/version");
    assert!(reply.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(reply.contains("Cache-Control: no-cache\r\n"));
    let version: Value = serde_json::from_str(http_body(&reply)).unwrap();
    assert_eq!(version[0]["Protocol-Version"], "1.1");

    for path in ["/json", "/json/list"] {
        let reply = http_get(addr, path);
        let targets: Value = serde_json::from_str(http_body(&reply)).unwrap();
        assert_eq!(targets.as_array().unwrap().len(), 1);
        assert_eq!(targets[0]["id"], std::process::id().to_string());
        assert_eq!(
            targets[0]["webSocketDebuggerUrl"],
            format!("ws://{}/node", addr)
        );
    }

    let own = http_get(addr, &format!("/json/activate/{}", std::process::id()));
    assert_eq!(http_body(&own), "Target activated");

    let other = http_get(addr, &format!("/json/activate/{}", std::process::id() + 1));
    assert!(other.is_empty());
    assert!(http_get(addr, "/not-discovery").is_empty());

    // Discovery never attaches a frontend
    assert_eq!(agent.pump_tasks(), 0);
    agent.stop().unwrap();
}

#[test]
fn test_messages_round_trip_in_order() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);
    assert_eq!(log.borrow().connects, 1);

    for i in 0..3 {
        client.send(Message::Text(format!("m{}", i))).unwrap();
    }
    pump_until(&agent, || log.borrow().dispatched.len() == 3);
    assert_eq!(log.borrow().dispatched, vec!["m0", "m1", "m2"]);

    for i in 0..3 {
        assert_eq!(read_text(&mut client), format!("echo:m{}", i));
    }
    agent.stop().unwrap();
}

#[test]
fn test_second_session_refused() {
    let (agent, addr, log) = started_agent();
    let mut first = attach(&agent, addr);

    assert!(tungstenite::connect(format!("ws://{}/node", addr)).is_err());

    first.send(Message::Text("still-first".to_string())).unwrap();
    pump_until(&agent, || !log.borrow().dispatched.is_empty());
    assert_eq!(read_text(&mut first), "echo:still-first");
    assert_eq!(log.borrow().connects, 1);
    assert_eq!(log.borrow().disconnects, 0);
    agent.stop().unwrap();
}

#[test]
fn test_discovery_answers_while_session_attached() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);

    let reply = http_get(addr, "/json/list");
    assert!(reply.starts_with("HTTP/1.0 200 OK\r\n"));
    let targets: Value = serde_json::from_str(http_body(&reply)).unwrap();
    assert_eq!(targets[0]["id"], std::process::id().to_string());

    client.send(Message::Text("after-discovery".to_string())).unwrap();
    pump_until(&agent, || !log.borrow().dispatched.is_empty());
    assert_eq!(read_text(&mut client), "echo:after-discovery");
    assert_eq!(log.borrow().connects, 1);
    assert_eq!(log.borrow().disconnects, 0);
    agent.stop().unwrap();
}

#[test]
fn test_idle_connection_does_not_delay_session() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);

    let _idle = TcpStream::connect(addr).unwrap();
    // Give the IO thread time to accept the idle socket
    thread::sleep(Duration::from_millis(50));

    let sent = Instant::now();
    client.send(Message::Text("ping".to_string())).unwrap();
    pump_until(&agent, || !log.borrow().dispatched.is_empty());
    assert!(
        sent.elapsed() < Duration::from_secs(1),
        "message took {:?} to arrive",
        sent.elapsed()
    );
    assert_eq!(read_text(&mut client), "echo:ping");
    agent.stop().unwrap();
}

#[test]
fn test_upgrade_on_other_path_refused() {
    let (agent, addr, _log) = started_agent();
    assert!(tungstenite::connect(format!("ws://{}/other", addr)).is_err());
    assert!(!agent.is_connected());
    agent.stop().unwrap();
}

#[test]
fn test_client_close_disconnects_once_and_allows_reattach() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);

    client.close(None).unwrap();
    let _ = client.flush();
    pump_until(&agent, || !agent.is_connected());
    drop(client);
    assert_eq!(log.borrow().disconnects, 1);

    let _again = attach(&agent, addr);
    assert_eq!(log.borrow().connects, 2);
    assert_eq!(log.borrow().disconnects, 1);
    agent.stop().unwrap();
}

#[test]
fn test_pause_loop_serves_remote_frontend() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);

    let frontend = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        client.send(Message::Text("step".to_string())).unwrap();
        let step = read_text(&mut client);
        client.send(Message::Text("resume".to_string())).unwrap();
        let resume = read_text(&mut client);
        (client, step, resume)
    });

    agent.run_message_loop_on_pause();
    let (_client, step, resume) = frontend.join().unwrap();

    assert_eq!(step, "echo:step");
    assert_eq!(resume, "echo:resume");
    assert_eq!(log.borrow().dispatched, vec!["step", "resume"]);
    agent.stop().unwrap();
}

#[test]
fn test_wait_for_disconnect_returns_when_client_leaves() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);

    let frontend = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        client.close(None).unwrap();
        let _ = client.flush();
    });

    agent.wait_for_disconnect();
    frontend.join().unwrap();
    assert!(!agent.is_connected());
    assert_eq!(log.borrow().disconnects, 1);
    agent.stop().unwrap();
}

#[test]
fn test_wait_mode_blocks_start_until_run() {
    let port = {
        let spare = TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let frontend = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut client = loop {
            match tungstenite::connect(format!("ws://{}/node", addr)) {
                Ok((client, _)) => break client,
                Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Err(e) => panic!("agent never listened: {}", e),
            }
        };
        for message in [r#"{"id":1,"method":"Debugger.enable"}"#, r#"{"id":2,"method":"Runtime.run"}"#] {
            client.send(Message::Text(message.to_string())).unwrap();
        }
        let replies = [read_text(&mut client), read_text(&mut client)];
        (client, replies)
    });

    let (agent, log) = agent_with(config(port, true));
    assert_eq!(agent.try_start().unwrap(), addr);

    // Start only returns once the frontend is attached and its queue delivered
    assert!(agent.is_connected());
    assert_eq!(log.borrow().connects, 1);
    assert_eq!(
        log.borrow().dispatched,
        vec![
            r#"{"id":1,"method":"Debugger.enable"}"#,
            r#"{"id":2,"method":"Runtime.run"}"#
        ]
    );

    let (_client, replies) = frontend.join().unwrap();
    assert!(replies[0].contains("Debugger.enable"));
    assert!(replies[1].contains("Runtime.run"));

    // Tasks the IO thread posted meanwhile are harmless repeats
    agent.pump_tasks();
    assert_eq!(log.borrow().connects, 1);
    assert_eq!(log.borrow().dispatched.len(), 2);
    agent.stop().unwrap();
}

#[test]
fn test_stop_closes_live_session() {
    let (agent, addr, log) = started_agent();
    let mut client = attach(&agent, addr);

    agent.stop().unwrap();
    assert!(!agent.is_started());
    assert!(!agent.is_connected());
    assert_eq!(log.borrow().disconnects, 1);

    if let MaybeTlsStream::Plain(stream) = client.get_mut() {
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    }
    let ended = loop {
        match client.read() {
            Ok(Message::Close(_)) | Err(_) => break true,
            Ok(_) => continue,
        }
    };
    assert!(ended);
}

#[test]
fn test_start_twice_and_bind_conflict() {
    let (agent, addr, _log) = started_agent();
    assert!(matches!(agent.try_start(), Err(AgentError::AlreadyStarted(a)) if a == addr));

    let (clash, _log) = agent_with(config(addr.port(), false));
    assert!(matches!(clash.try_start(), Err(AgentError::Bind { .. })));
    assert!(!clash.is_started());
    agent.stop().unwrap();
}
