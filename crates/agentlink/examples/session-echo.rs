//! Session echo example — starts an agent on one end of a socket pair,
//! opens two sessions from the other, and round-trips bytes on each.
//!
//! Run with:
//!   cargo run --example session-echo

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use agentlink::remote::{
    open_connection, Agent, AgentSession, SessionFactory, SessionParams,
};

struct EchoFactory;

impl SessionFactory for EchoFactory {
    fn start_session(&mut self, session: AgentSession) -> Result<(), String> {
        eprintln!(
            "[agent] session '{}' on channel {}",
            session.params.name, session.channel
        );
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
        channel: u32,
        host: &str,
        port: u16,
        _properties: &BTreeMap<String, String>,
    ) -> Result<(), String> {
        eprintln!("[agent] attach channel {channel} to {host}:{port}");
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (ide_raw, agent_raw) = UnixStream::pair()?;
    let agent = Agent::run(agent_raw.try_clone()?, agent_raw, EchoFactory)?;

    let conn = open_connection(ide_raw.try_clone()?, ide_raw)?;

    for name in ["build", "shell"] {
        let session = conn.new_session(SessionParams::named(name))?;
        let mut streams = session.streams()?;

        let message = format!("hello from {name}");
        streams.writer.write_all(message.as_bytes())?;

        let mut echoed = vec![0u8; message.len()];
        streams.reader.read_exact(&mut echoed)?;
        eprintln!(
            "[ide] channel {} echoed: {}",
            session.channel(),
            String::from_utf8_lossy(&echoed)
        );
    }

    conn.shutdown();
    agent.join();
    Ok(())
}
