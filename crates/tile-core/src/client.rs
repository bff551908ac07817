use crate::path::Path;
use crate::wire::{
    read_frame, write_frame, CommandRequest, CommandResponse, FrameError, DEFAULT_MAX_FRAME_BYTES,
};
use serde_json::{Map, Value};
use std::io;
use std::path::{Path as FsPath, PathBuf};
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("server closed the connection")]
    Disconnected,
    #[error("client is closed")]
    Closed,
}

/// One connection to a hub socket; requests are sent one at a time.
#[derive(Debug)]
pub struct Client {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
    max_frame_bytes: usize,
}

impl Client {
    pub async fn connect(path: impl AsRef<FsPath>) -> Result<Self, ClientError> {
        let socket_path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|source| ClientError::Connect {
                path: socket_path.clone(),
                source,
            })?;
        debug!(event = "ipc_client_connect", socket = %socket_path.display());
        Ok(Self {
            socket_path,
            stream: Some(stream),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn socket_path(&self) -> &FsPath {
        &self.socket_path
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Sends one request and waits for its response. Any transport failure
    /// closes the client.
    pub async fn call(&mut self, request: &CommandRequest) -> Result<CommandResponse, ClientError> {
        let max_frame_bytes = self.max_frame_bytes;
        let stream = self.stream.as_mut().ok_or(ClientError::Closed)?;
        let result = async {
            write_frame(stream, request, max_frame_bytes).await?;
            read_frame::<_, CommandResponse>(stream, max_frame_bytes).await
        }
        .await;

        match result {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                self.stream = None;
                Err(ClientError::Disconnected)
            }
            Err(err) => {
                self.stream = None;
                Err(err.into())
            }
        }
    }

    pub async fn call_command(
        &mut self,
        path: Path,
        command: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<CommandResponse, ClientError> {
        let mut request = CommandRequest::new(path, command).with_args(args);
        request.kwargs = kwargs;
        self.call(&request).await
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(event = "ipc_client_close", socket = %self.socket_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::net::UnixListener;

    fn test_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("tile-client-{name}-{}-{nanos}.sock", std::process::id()))
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let path = test_path("missing");
        let err = Client::connect(&path).await.expect_err("no socket");
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn call_round_trips_one_frame() {
        let path = test_path("echo");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let request: CommandRequest = read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES)
                .await
                .expect("read")
                .expect("frame");
            let response = CommandResponse::success(json!([request.command, request.args]));
            write_frame(&mut stream, &response, DEFAULT_MAX_FRAME_BYTES)
                .await
                .expect("write");
        });

        let mut client = Client::connect(&path).await.expect("connect");
        let response = client
            .call_command(Path::root(), "status", vec![json!(1)], Map::new())
            .await
            .expect("call");
        assert_eq!(response, CommandResponse::success(json!(["status", [1]])));
        server.await.expect("server task");

        let err = client
            .call(&CommandRequest::new(Path::root(), "status"))
            .await
            .expect_err("peer gone");
        assert!(matches!(err, ClientError::Disconnected | ClientError::Frame(_)));
        assert!(client.is_closed());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let path = test_path("close");
        let listener = UnixListener::bind(&path).expect("bind");
        let mut client = Client::connect(&path).await.expect("connect");
        drop(listener);

        client.close();
        client.close();
        let err = client
            .call(&CommandRequest::new(Path::root(), "status"))
            .await
            .expect_err("closed");
        assert!(matches!(err, ClientError::Closed));
        let _ = std::fs::remove_file(&path);
    }
}
