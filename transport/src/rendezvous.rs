//! Listener-side and connector-side rendezvous.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Backoff between connect attempts while the listener is not yet up.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Directional channel names, from the server's perspective: the server
/// reads from `input` and writes to `output`.
#[derive(Debug, Clone)]
pub struct PipePair {
    pub input: String,
    pub output: String,
}

impl Default for PipePair {
    fn default() -> Self {
        Self {
            input: "input".to_string(),
            output: "output".to_string(),
        }
    }
}

impl PipePair {
    fn input_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.sock", self.input))
    }

    fn output_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.sock", self.output))
    }
}

/// What the client spawns as the server process.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the child (e.g. the rendezvous directory).
    pub env: Vec<(String, String)>,
}

impl LaunchCommand {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }
}

/// The two live streams after rendezvous. Owned exclusively by the RPC
/// channel afterwards; dropping it closes both streams exactly once.
#[derive(Debug)]
pub struct Connection {
    reader: UnixStream,
    writer: UnixStream,
}

impl Connection {
    /// Split into (inbound, outbound) streams for the RPC channel.
    #[must_use]
    pub fn into_streams(self) -> (UnixStream, UnixStream) {
        (self.reader, self.writer)
    }
}

/// Unlinks socket files when dropped, so no path outlives the rendezvous
/// regardless of how it ended. Connected streams are unaffected.
struct SocketPaths(Vec<PathBuf>);

impl Drop for SocketPaths {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Both listener endpoints, bound but not yet connected.
pub struct Listening {
    input: UnixListener,
    output: UnixListener,
    paths: SocketPaths,
}

/// Bind the two listener endpoints (client role). Stale socket files from a
/// previous run are removed first.
pub fn bind(dir: &Path, pair: &PipePair) -> Result<Listening, TransportError> {
    std::fs::create_dir_all(dir)?;

    let input_path = pair.input_path(dir);
    let output_path = pair.output_path(dir);
    for path in [&input_path, &output_path] {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }

    let input = UnixListener::bind(&input_path).map_err(|source| TransportError::Bind {
        path: input_path.clone(),
        source,
    })?;
    let output = UnixListener::bind(&output_path).map_err(|source| TransportError::Bind {
        path: output_path.clone(),
        source,
    })?;

    Ok(Listening {
        input,
        output,
        paths: SocketPaths(vec![input_path, output_path]),
    })
}

impl Listening {
    /// Wait for the server to connect to both endpoints.
    ///
    /// Cancellation wins over the timeout; either way the socket files are
    /// unlinked and any partially accepted stream is dropped.
    pub async fn accept(
        self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Connection, TransportError> {
        let _paths = self.paths;

        let both = async {
            let (to_server, _) = self.input.accept().await?;
            let (from_server, _) = self.output.accept().await?;
            Ok::<_, std::io::Error>((to_server, from_server))
        };

        let (to_server, from_server) = tokio::select! {
            () = cancel.cancelled() => return Err(TransportError::RendezvousCancelled),
            accepted = tokio::time::timeout(timeout, both) => match accepted {
                Err(_) => {
                    return Err(TransportError::RendezvousFailed {
                        reason: format!("server did not connect within {timeout:?}"),
                    });
                }
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Ok(Ok(streams)) => streams,
            },
        };

        tracing::debug!("server connected to both pipes");
        // The client reads what the server writes (output) and writes what
        // the server reads (input).
        Ok(Connection {
            reader: from_server,
            writer: to_server,
        })
    }
}

fn spawn_server(command: &LaunchCommand) -> Result<Child, TransportError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    cmd.spawn().map_err(TransportError::ProcessSpawnFailed)
}

/// Client-role rendezvous: bind both listeners, spawn the server process,
/// and wait for it to connect to both pipes.
///
/// Spawn failure is raised before any wait. Exactly one child is spawned
/// per call; it is killed on drop if the session never hands it off.
pub async fn launch(
    dir: &Path,
    pair: &PipePair,
    command: &LaunchCommand,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(Connection, Child), TransportError> {
    let listening = bind(dir, pair)?;
    let child = spawn_server(command)?;
    let connection = listening.accept(timeout, cancel).await?;
    Ok((connection, child))
}

/// Server-role rendezvous: connect to both named endpoints, retrying with a
/// short backoff until the listener is up or the bounded wait elapses.
pub async fn connect(
    dir: &Path,
    pair: &PipePair,
    timeout: Duration,
) -> Result<Connection, TransportError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let reader = connect_one(&pair.input_path(dir), deadline).await?;
    let writer = connect_one(&pair.output_path(dir), deadline).await?;
    tracing::debug!("connected to both pipes");
    Ok(Connection { reader, writer })
}

async fn connect_one(
    path: &Path,
    deadline: tokio::time::Instant,
) -> Result<UnixStream, TransportError> {
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                if tokio::time::Instant::now() + CONNECT_RETRY_INTERVAL >= deadline {
                    return Err(TransportError::RendezvousFailed {
                        reason: format!("{}: {e}", path.display()),
                    });
                }
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SHORT: Duration = Duration::from_millis(200);
    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn rendezvous_yields_two_connected_streams() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PipePair::default();

        let listening = bind(dir.path(), &pair).unwrap();
        let server = {
            let dir = dir.path().to_path_buf();
            let pair = pair.clone();
            tokio::spawn(async move { connect(&dir, &pair, LONG).await })
        };

        let cancel = CancellationToken::new();
        let client_conn = listening.accept(LONG, &cancel).await.unwrap();
        let server_conn = server.await.unwrap().unwrap();

        let (mut client_read, mut client_write) = client_conn.into_streams();
        let (mut server_read, mut server_write) = server_conn.into_streams();

        // Client → server over `input`.
        client_write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // Server → client over `output`.
        server_write.write_all(b"pong").await.unwrap();
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn socket_files_are_unlinked_after_rendezvous() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PipePair::default();
        let input_path = dir.path().join("input.sock");

        let listening = bind(dir.path(), &pair).unwrap();
        assert!(input_path.exists());

        let server = {
            let dir = dir.path().to_path_buf();
            let pair = pair.clone();
            tokio::spawn(async move { connect(&dir, &pair, LONG).await })
        };
        let cancel = CancellationToken::new();
        let _conn = listening.accept(LONG, &cancel).await.unwrap();
        server.await.unwrap().unwrap();

        assert!(!input_path.exists());
        assert!(!dir.path().join("output.sock").exists());
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PipePair::default();
        let listening = bind(dir.path(), &pair).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = listening.accept(LONG, &cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::RendezvousCancelled), "{err}");
        assert!(!dir.path().join("input.sock").exists());
        assert!(!dir.path().join("output.sock").exists());
    }

    #[tokio::test]
    async fn accept_times_out_when_no_server_connects() {
        let dir = tempfile::tempdir().unwrap();
        let listening = bind(dir.path(), &PipePair::default()).unwrap();

        let cancel = CancellationToken::new();
        let err = listening.accept(SHORT, &cancel).await.unwrap_err();
        assert!(
            matches!(err, TransportError::RendezvousFailed { .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn connect_fails_when_endpoint_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        let err = connect(dir.path(), &PipePair::default(), SHORT)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransportError::RendezvousFailed { .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn connect_retries_until_listener_is_up() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PipePair::default();

        let server = {
            let dir = dir.path().to_path_buf();
            let pair = pair.clone();
            tokio::spawn(async move { connect(&dir, &pair, LONG).await })
        };

        // Bind only after the server has started retrying.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let listening = bind(dir.path(), &pair).unwrap();
        let cancel = CancellationToken::new();
        let client = listening.accept(LONG, &cancel).await.unwrap();
        let server_conn = server.await.unwrap().unwrap();

        let (_, mut client_write) = client.into_streams();
        let (mut server_read, _) = server_conn.into_streams();
        client_write.write_all(b"!").await.unwrap();
        let mut buf = [0u8; 1];
        server_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"!");
    }

    #[tokio::test]
    async fn spawn_failure_is_fast_and_does_not_wait() {
        let dir = tempfile::tempdir().unwrap();
        let command = LaunchCommand::new("/nonexistent/barls-server");

        let started = std::time::Instant::now();
        let cancel = CancellationToken::new();
        let err = launch(dir.path(), &PipePair::default(), &command, LONG, &cancel)
            .await
            .unwrap_err();

        assert!(
            matches!(err, TransportError::ProcessSpawnFailed(_)),
            "{err}"
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_files() {
        let dir = tempfile::tempdir().unwrap();
        let pair = PipePair::default();

        // Simulate a previous run that died without cleanup.
        drop(UnixListener::bind(dir.path().join("input.sock")).unwrap());
        std::fs::write(dir.path().join("output.sock"), b"").unwrap();

        let listening = bind(dir.path(), &pair).unwrap();
        drop(listening);
    }
}
