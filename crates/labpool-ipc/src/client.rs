//! IPC client implementation

use labpool_api::{Command, Event, Request, Response, ResponsePayload, ResponseResult};
use labpool_util::Identity;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

use crate::{IpcError, IpcResult};

/// Client side of the labpoold socket protocol.
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to a running daemon.
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send one command and wait for its response. Event lines arriving
    /// in between are skipped.
    pub async fn send(&mut self, identity: Identity, command: Command) -> IpcResult<Response> {
        let request = Request::new(self.next_request_id, identity, command);
        self.next_request_id += 1;

        let mut json = serde_json::to_string(&request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Response>(line) {
                Ok(response) if response.request_id == request.request_id => {
                    return Ok(response);
                }
                Ok(_) => continue,
                Err(_) => {
                    debug!("Skipping non-response line");
                    continue;
                }
            }
        }
    }

    /// Subscribe to daemon events, consuming this client. The stream
    /// yields every event broadcast from the daemon.
    pub async fn subscribe(mut self, identity: Identity) -> IpcResult<EventStream> {
        let response = self.send(identity, Command::SubscribeEvents).await?;
        match response.result {
            ResponseResult::Ok(ResponsePayload::Subscribed) => Ok(EventStream {
                reader: self.reader,
            }),
            ResponseResult::Ok(_) => Err(IpcError::ServerError(
                "Unexpected response to subscription".into(),
            )),
            ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
        }
    }
}

/// Stream of daemon events for a subscribed client.
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
}

impl EventStream {
    /// Wait for the next event. Non-event lines are skipped.
    pub async fn next_event(&mut self) -> IpcResult<Event> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<Event>(line) {
                return Ok(event);
            }
            debug!("Skipping non-event line");
        }
    }
}
