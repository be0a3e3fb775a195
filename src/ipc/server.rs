//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! touchpad events to subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::control::{ControlError, ControlHandle};
use crate::events::TouchpadEvent;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Largest accepted request frame
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: ClientContext,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler needs
#[derive(Clone)]
struct ClientContext {
    control: ControlHandle,
    events: broadcast::Sender<TouchpadEvent>,
    start_time: Instant,
}

/// Outcome of one request beyond its response
#[derive(Debug, PartialEq, Eq)]
enum After {
    Continue,
    Subscribe,
    /// Stop the daemon once the response is on the wire
    Shutdown,
}

impl Server {
    /// Bind the socket, replacing any stale one
    pub fn bind(
        socket_path: &Path,
        control: ControlHandle,
        events: broadcast::Sender<TouchpadEvent>,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context: ClientContext {
                control,
                events,
                start_time: Instant::now(),
            },
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = self.context.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one client until it disconnects
///
/// Requests are read on a separate task so a subscribed client can receive
/// pushed notifications while no request is pending.
async fn handle_client(stream: UnixStream, context: ClientContext) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (request_tx, mut request_rx) = mpsc::channel::<Request>(8);

    let reader_task = tokio::spawn(async move {
        loop {
            match read_request(&mut reader).await {
                Ok(Some(request)) => {
                    if request_tx.send(request).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(?e, "dropping client");
                    break;
                }
            }
        }
    });

    let mut events: Option<broadcast::Receiver<TouchpadEvent>> = None;

    let result = loop {
        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else { break Ok(()) };
                debug!(?request, "received request");

                let (response, after) = process_request(request, &context).await;
                if after == After::Subscribe && events.is_none() {
                    events = Some(context.events.subscribe());
                    debug!("client subscribed to notifications");
                }
                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
                if after == After::Shutdown {
                    // Server shutdown cancels this task, so the reply goes out first
                    if let Err(e) = writer.flush().await {
                        break Err(e.into());
                    }
                    if let Err(e) = context.control.shutdown().await {
                        warn!(%e, "shutdown request not delivered");
                    }
                    break Ok(());
                }
            }
            event = next_event(&mut events) => {
                let notification = match event {
                    Ok(event) => Notification::Event { event },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged");
                        Notification::Lagged { skipped }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                        continue;
                    }
                };
                if let Err(e) = send_message(&mut writer, &notification).await {
                    break Err(e);
                }
            }
        }
    };

    reader_task.abort();
    result
}

/// Wait for the next event, or forever when not subscribed
async fn next_event(
    events: &mut Option<broadcast::Receiver<TouchpadEvent>>,
) -> Result<TouchpadEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed request; `None` on clean EOF
async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Request>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("message too large: {len} bytes");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;

    let request = serde_json::from_slice(&msg_buf).context("failed to parse request")?;
    Ok(Some(request))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

fn control_error(e: ControlError) -> Response {
    match e {
        ControlError::Closed => Response::error("unavailable", e),
        ControlError::Config(e) => Response::error("invalid_config", e),
    }
}

/// Process a request and return a response
async fn process_request(request: Request, context: &ClientContext) -> (Response, After) {
    let control = &context.control;
    let response = match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => match control.status().await {
            Ok(status) => Response::Status(DaemonStatus::new(
                status,
                context.start_time.elapsed().as_secs(),
            )),
            Err(e) => control_error(e),
        },

        Request::ToggleMode => match control.toggle_mode().await {
            Ok(mode) => {
                info!(%mode, "mode toggled via IPC");
                Response::ModeChanged { mode }
            }
            Err(e) => control_error(e),
        },

        Request::Reconfigure { config } => match control.reconfigure(config).await {
            Ok(config) => Response::ConfigApplied {
                config: (*config).clone(),
            },
            Err(e) => control_error(e),
        },

        Request::ReloadConfig => match control.reload_config().await {
            Ok(config) => Response::ConfigApplied {
                config: (*config).clone(),
            },
            Err(e) => control_error(e),
        },

        Request::Subscribe => return (Response::Subscribed, After::Subscribe),

        Request::Shutdown => return (Response::ShuttingDown, After::Shutdown),
    };

    (response, After::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{Config, ConfigStore, Mode};
    use crate::control;
    use crate::hotkey::Key;
    use crate::testing::Harness;

    fn socket_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "touchpad-hotkey-ipc-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    async fn roundtrip<T: serde::de::DeserializeOwned>(
        stream: &mut UnixStream,
        request: &Request,
    ) -> T {
        send_message(stream, request).await.unwrap();
        read_frame(stream).await
    }

    async fn read_frame<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> T {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut buf = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    async fn start(h: &Harness, name: &str) -> (Arc<Server>, PathBuf) {
        let dir = socket_dir(name);
        let store = ConfigStore::new(dir.join("config.json"));
        let (handle, rx) = control::channel(8);
        tokio::spawn(control::run(Arc::clone(&h.machine), store, rx));

        let socket = dir.join("daemon.sock");
        let server = Arc::new(Server::bind(&socket, handle, h.event_tx.clone()).unwrap());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });
        (server, socket)
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let h = Harness::start(Config::default());
        let (server, socket) = start(&h, "status").await;
        let mut stream = UnixStream::connect(&socket).await.unwrap();

        let pong: Response = roundtrip(&mut stream, &Request::Ping).await;
        assert!(matches!(pong, Response::Pong));

        let status: Response = roundtrip(&mut stream, &Request::GetStatus).await;
        match status {
            Response::Status(status) => {
                assert_eq!(status.state, "Idle");
                assert!(!status.touchpad_active);
                assert_eq!(status.bound_keys, vec![Key::new("f1")]);
            }
            other => panic!("unexpected response {:?}", other),
        }

        server.shutdown().await;
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_reconfigure_errors_are_reported() {
        let h = Harness::start(Config::default());
        let (server, socket) = start(&h, "reconfigure").await;
        let mut stream = UnixStream::connect(&socket).await.unwrap();

        let bad = Config {
            left_click_key: Key::new("f1"),
            ..Config::default()
        };
        let response: Response =
            roundtrip(&mut stream, &Request::Reconfigure { config: bad }).await;
        assert!(matches!(response, Response::Error { ref code, .. } if code == "invalid_config"));

        let toggled: Response = roundtrip(&mut stream, &Request::ToggleMode).await;
        assert!(matches!(toggled, Response::ModeChanged { mode: Mode::Toggle }));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let h = Harness::start(Config::default());
        let (server, socket) = start(&h, "subscribe").await;
        let mut stream = UnixStream::connect(&socket).await.unwrap();

        let ack: Response = roundtrip(&mut stream, &Request::Subscribe).await;
        assert!(matches!(ack, Response::Subscribed));

        h.event_tx.send(TouchpadEvent::TouchpadActivated).unwrap();
        let note: Notification = read_frame(&mut stream).await;
        assert!(matches!(
            note,
            Notification::Event { event: TouchpadEvent::TouchpadActivated }
        ));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_reply_precedes_stop() {
        let h = Harness::start(Config::default());
        let dir = socket_dir("shutdown");
        let (handle, rx) = control::channel(8);
        let control_task = tokio::spawn(control::run(
            Arc::clone(&h.machine),
            ConfigStore::new(dir.join("config.json")),
            rx,
        ));

        let socket = dir.join("daemon.sock");
        let server = Arc::new(Server::bind(&socket, handle, h.event_tx.clone()).unwrap());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        send_message(&mut stream, &Request::Shutdown).await.unwrap();

        // the control loop only stops after the reply was written
        control_task.await.unwrap();
        server.shutdown().await;

        let reply: Response = read_frame(&mut stream).await;
        assert!(matches!(reply, Response::ShuttingDown));
    }

    #[tokio::test]
    async fn test_oversized_frame_drops_client() {
        let mut data: &[u8] = &(MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        assert!(read_request(&mut data).await.is_err());

        let mut empty: &[u8] = &[];
        assert!(read_request(&mut empty).await.unwrap().is_none());
    }
}
