//! Minimal clamd over TCP: `zPING` and `zINSTREAM` only

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

pub struct FakeClamd {
    addr: SocketAddr,
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeClamd {
    /// Listen on an ephemeral port and answer every INSTREAM with `reply`
    /// (e.g. `b"stream: OK\0"`)
    pub fn start(reply: &'static [u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake clamd");
        let addr = listener.local_addr().expect("fake clamd address");
        let payloads = Arc::new(Mutex::new(Vec::new()));

        let seen = payloads.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let seen = seen.clone();
                thread::spawn(move || {
                    let _ = serve(stream, reply, &seen);
                });
            }
        });

        Self { addr, payloads }
    }

    /// An address nothing listens on
    pub fn refused_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind free port");
        let addr = listener.local_addr().expect("free port address");
        drop(listener);
        addr.to_string()
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Bytes received by each completed INSTREAM session
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().expect("payload lock").clone()
    }
}

fn read_command(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut command = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == 0 || byte[0] == b'\n' {
            break;
        }
        command.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&command).to_string())
}

fn serve(
    mut stream: TcpStream,
    reply: &'static [u8],
    seen: &Mutex<Vec<Vec<u8>>>,
) -> std::io::Result<()> {
    let command = read_command(&mut stream)?;
    match command.trim_start_matches(['z', 'n']) {
        "PING" => stream.write_all(b"PONG\0")?,
        "INSTREAM" => {
            let mut payload = Vec::new();
            loop {
                let mut len = [0u8; 4];
                stream.read_exact(&mut len)?;
                let len = u32::from_be_bytes(len) as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                stream.read_exact(&mut chunk)?;
                payload.extend_from_slice(&chunk);
            }
            if let Ok(mut seen) = seen.lock() {
                seen.push(payload);
            }
            stream.write_all(reply)?;
        }
        _ => stream.write_all(b"UNKNOWN COMMAND\0")?,
    }
    // The client reads until EOF
    stream.shutdown(std::net::Shutdown::Write)
}
