#![cfg(unix)]

//! End-to-end control-channel behavior against a live agent: session
//! handshakes, correlated calls resolving out of order, cancellation,
//! and connection teardown.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use agentlink::mux::{Multiplexor, CONTROL_CHANNEL};
use agentlink::remote::{
    open_connection, Agent, AgentSession, Outcome, RemoteError, ResponderBuilder, Sender,
    SessionFactory, SessionParams, SessionState, TaskKind,
};
use serde_json::Value;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

/// Agent-side factory that echoes session traffic and records calls.
struct RecordingFactory {
    started: mpsc::Sender<(u32, String)>,
}

impl SessionFactory for RecordingFactory {
    fn start_session(&mut self, session: AgentSession) -> Result<(), String> {
        if session.params.properties.get("mode").map(String::as_str) == Some("refuse") {
            return Err(format!("refusing session '{}'", session.params.name));
        }
        let _ = self
            .started
            .send((session.channel, session.params.name.clone()));
        let mut streams = session.streams;
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            while let Ok(n) = streams.reader.read(&mut buf) {
                if n == 0 || streams.writer.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn attach_debugger(
        &mut self,
        _channel: u32,
        host: &str,
        _port: u16,
        _properties: &BTreeMap<String, String>,
    ) -> Result<(), String> {
        if host == "unreachable.invalid" {
            return Err("cannot reach debugger host".into());
        }
        Ok(())
    }
}

fn live_agent() -> (UnixStream, Agent, mpsc::Receiver<(u32, String)>) {
    init_logging();
    let (ide_raw, agent_raw) = UnixStream::pair().unwrap();
    let (started, started_rx) = mpsc::channel();
    let agent = Agent::run(
        agent_raw.try_clone().unwrap(),
        agent_raw,
        RecordingFactory { started },
    )
    .unwrap();
    (ide_raw, agent, started_rx)
}

#[test]
fn fresh_connection_starts_session_on_channel_one() {
    let (ide_raw, _agent, started_rx) = live_agent();
    let conn = open_connection(ide_raw.try_clone().unwrap(), ide_raw).unwrap();

    let session = conn.new_session(SessionParams::named("build")).unwrap();
    assert_eq!(session.channel(), 1);
    assert_eq!(session.state(), SessionState::Active);

    // The agent saw the same channel and name before the call returned.
    let (channel, name) = started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!((channel, name.as_str()), (1, "build"));

    // Bytes flow both ways on the session's dedicated streams.
    let mut streams = session.streams().unwrap();
    streams.writer.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    streams.reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");
}

#[test]
fn burned_channel_ids_are_never_reissued() {
    let (ide_raw, _agent, _started_rx) = live_agent();
    let conn = open_connection(ide_raw.try_clone().unwrap(), ide_raw).unwrap();

    let mut refused = SessionParams::named("doomed");
    refused
        .properties
        .insert("mode".to_string(), "refuse".to_string());
    assert!(matches!(
        conn.new_session(refused).unwrap_err(),
        RemoteError::Rejected(_)
    ));

    let first = conn.new_session(SessionParams::named("a")).unwrap();
    let second = conn.new_session(SessionParams::named("b")).unwrap();
    assert_eq!(first.channel(), 2);
    assert_eq!(second.channel(), 3);

    first.close();
    let third = conn.new_session(SessionParams::named("c")).unwrap();
    assert_eq!(third.channel(), 4);
}

#[test]
fn attach_failure_reported_without_killing_the_session() {
    let (ide_raw, _agent, _started_rx) = live_agent();
    let conn = open_connection(ide_raw.try_clone().unwrap(), ide_raw).unwrap();
    let session = conn.new_session(SessionParams::named("debug")).unwrap();

    let err = session
        .attach_debugger("unreachable.invalid", 5005, BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, RemoteError::Rejected(_)));
    assert_eq!(session.state(), SessionState::Active);

    session
        .attach_debugger("localhost", 5005, BTreeMap::new())
        .unwrap();
}

/// Remote that parks requests and answers them on demand, for driving
/// response ordering by hand.
fn manual_remote(
    raw: UnixStream,
) -> (Multiplexor, mpsc::Receiver<(u64, TaskKind)>, mpsc::Sender<(u64, Outcome)>) {
    init_logging();
    let mux = Multiplexor::new(raw.try_clone().unwrap(), raw);
    let control = mux.streams_for_channel(CONTROL_CHANNEL).unwrap();

    let (seen_tx, seen_rx) = mpsc::channel::<(u64, TaskKind)>();
    let (answer_tx, answer_rx) = mpsc::channel::<(u64, Outcome)>();

    let mut reader = agentlink::remote::control::MessageReader::new(control.reader);
    let mut writer = control.writer;

    thread::spawn(move || {
        while let Ok(request) =
            reader.next_message::<agentlink::remote::control::RequestEnvelope>()
        {
            let _ = seen_tx.send((request.id, request.task));
        }
    });
    thread::spawn(move || {
        while let Ok((id, outcome)) = answer_rx.recv() {
            let envelope = agentlink::remote::control::ResponseEnvelope { id, outcome };
            if agentlink::remote::control::write_message(&mut writer, &envelope).is_err() {
                break;
            }
        }
    });

    (mux, seen_rx, answer_tx)
}

#[test]
fn concurrent_calls_resolve_out_of_order() {
    let (ide_raw, remote_raw) = UnixStream::pair().unwrap();
    let (_remote_mux, seen_rx, answer_tx) = manual_remote(remote_raw);

    let mux = Multiplexor::new(ide_raw.try_clone().unwrap(), ide_raw);
    let control = mux.streams_for_channel(CONTROL_CHANNEL).unwrap();
    let sender = Sender::new(control.reader, control.writer);

    let first = sender
        .send_and_receive::<_, Value>(TaskKind::StartSession, &Value::Null)
        .unwrap();
    let second = sender
        .send_and_receive::<_, Value>(TaskKind::StartSession, &Value::Null)
        .unwrap();
    assert_eq!(first.correlation_id(), 1);
    assert_eq!(second.correlation_id(), 2);

    let _ = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let _ = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    // Answer the later call first; each future resolves to its own
    // response regardless of wire order.
    answer_tx
        .send((2, Outcome::Success(serde_json::json!("second"))))
        .unwrap();
    assert_eq!(second.wait().unwrap(), serde_json::json!("second"));
    assert!(!first.is_resolved());

    answer_tx
        .send((1, Outcome::Success(serde_json::json!("first"))))
        .unwrap();
    assert_eq!(first.wait().unwrap(), serde_json::json!("first"));
}

#[test]
fn cancelled_call_ignores_its_late_response() {
    let (ide_raw, remote_raw) = UnixStream::pair().unwrap();
    let (_remote_mux, seen_rx, answer_tx) = manual_remote(remote_raw);

    let mux = Multiplexor::new(ide_raw.try_clone().unwrap(), ide_raw);
    let control = mux.streams_for_channel(CONTROL_CHANNEL).unwrap();
    let sender = Sender::new(control.reader, control.writer);

    let cancelled = sender
        .send_and_receive::<_, Value>(TaskKind::StartSession, &Value::Null)
        .unwrap();
    let (id, _) = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    cancelled.cancel();
    answer_tx
        .send((id, Outcome::Success(serde_json::json!("too late"))))
        .unwrap();

    assert!(matches!(
        cancelled.wait().unwrap_err(),
        RemoteError::Cancelled
    ));

    // The connection shrugged off the stale response.
    let healthy = sender
        .send_and_receive::<_, Value>(TaskKind::StartSession, &Value::Null)
        .unwrap();
    let (id, _) = seen_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    answer_tx
        .send((id, Outcome::Success(serde_json::json!("alive"))))
        .unwrap();
    assert_eq!(healthy.wait().unwrap(), serde_json::json!("alive"));
}

#[test]
fn connection_loss_fails_pending_calls_and_sessions() {
    init_logging();
    let (ide_raw, remote_raw) = UnixStream::pair().unwrap();
    let remote_mux = Multiplexor::new(remote_raw.try_clone().unwrap(), remote_raw);
    let remote_control = remote_mux.streams_for_channel(CONTROL_CHANNEL).unwrap();
    let _responder = ResponderBuilder::new(remote_control.reader, remote_control.writer)
        .handle(TaskKind::StartSession, |_: Value| Ok::<_, String>(Value::Null))
        .start();

    let probe = ide_raw.try_clone().unwrap();
    let conn = open_connection(ide_raw.try_clone().unwrap(), ide_raw).unwrap();
    let session = conn.new_session(SessionParams::named("doomed")).unwrap();
    let mut streams = session.streams().unwrap();

    // Sever the raw connection under everything.
    probe.shutdown(std::net::Shutdown::Both).unwrap();

    let mut buf = [0u8; 1];
    assert!(streams.reader.read(&mut buf).is_err());
    assert!(streams.writer.write_all(b"x").is_err());

    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while !conn.is_closed() && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(
        conn.new_session(SessionParams::named("next")).unwrap_err(),
        RemoteError::ConnectionClosed
    ));
}
