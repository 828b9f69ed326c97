//! Mock telescope for end-to-end tests
//!
//! Binds loopback listeners for the event port and both image ports, and
//! hands out [`MockLink`]s for each accepted socket. Tests script the
//! device side by writing event lines and frame bytes, and read back the
//! requests the client sends.
//!
//! ```ignore
//! let device = MockSeestar::start().await;
//! let telescope = Telescope::connect(device.settings()).await?;
//! let mut link = device.accept_events().await;
//! link.send_event(r#"{"Event": "View", "state": "working"}"#).await;
//! ```

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use seestar::Settings;
use seestar_device::test_utils::{event_line, mock_device};

use crate::{test_settings, WAIT};

/// Listeners standing in for one telescope
pub struct MockSeestar {
    events: Option<TcpListener>,
    telephoto: TcpListener,
    wide: TcpListener,
    settings: Settings,
}

impl MockSeestar {
    pub async fn start() -> Self {
        let (events, event_addr) = mock_device().await;
        let (telephoto, tele_addr) = mock_device().await;
        let (wide, wide_addr) = mock_device().await;

        let mut settings = test_settings();
        settings.device.event_port = port_of(&event_addr);
        settings.device.image_port = port_of(&tele_addr);
        settings.device.wide_image_port = port_of(&wide_addr);

        Self {
            events: Some(events),
            telephoto,
            wide,
            settings,
        }
    }

    /// Client settings pointing at this device
    pub fn settings(&self) -> Settings {
        self.settings.clone()
    }

    pub async fn accept_events(&self) -> MockLink {
        accept(self.events.as_ref().expect("event port is powered off")).await
    }

    pub async fn accept_telephoto(&self) -> MockLink {
        accept(&self.telephoto).await
    }

    pub async fn accept_wide(&self) -> MockLink {
        accept(&self.wide).await
    }

    /// Stop listening on the event port; further reconnects are refused.
    pub fn power_off_events(&mut self) {
        self.events = None;
    }
}

fn port_of(addr: &str) -> u16 {
    addr.rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .expect("listener port")
}

async fn accept(listener: &TcpListener) -> MockLink {
    let (socket, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("client never connected")
        .expect("accept");
    MockLink::new(socket)
}

/// Device side of one accepted socket
pub struct MockLink {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockLink {
    fn new(socket: TcpStream) -> Self {
        let (read, write) = socket.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    pub async fn send_event(&mut self, json: &str) {
        self.send_bytes(event_line(json).as_bytes()).await;
    }

    pub async fn send_events(&mut self, lines: &[&str]) {
        for line in lines {
            self.send_event(line).await;
        }
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write to client");
    }

    /// Next request line the client sent, parsed
    pub async fn recv_request(&mut self) -> Value {
        let mut line = String::new();
        let read = tokio::time::timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("no request from client")
            .expect("read from client");
        assert!(read > 0, "client closed the socket");
        assert!(line.ends_with("\r\n"), "request not CRLF terminated: {line:?}");
        serde_json::from_str(&line).expect("request is JSON")
    }

    /// Skip requests until one with `method` arrives
    pub async fn recv_method(&mut self, method: &str) -> Value {
        loop {
            let request = self.recv_request().await;
            if request["method"] == method {
                return request;
            }
        }
    }

    /// Wait until the client closes its side
    pub async fn expect_closed(&mut self) {
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::time::timeout(WAIT, self.reader.read_line(&mut line))
                .await
                .expect("client kept the socket open");
            match read {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    }
}
