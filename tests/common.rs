use loomfs::{websocket, Engine};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;

/// Helper to create an Engine pre-populated with content and return it.
pub async fn create_test_engine(
    files: Vec<(&str, &str)>,
) -> Result<Engine, Box<dyn std::error::Error>> {
    let engine = Engine::new().await?;
    let vfs = engine.vfs();

    for (path, content) in files {
        // Create parent directories if needed
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() > 2 {
            let mut dir_path = String::new();
            for part in &parts[1..parts.len() - 1] {
                dir_path.push('/');
                dir_path.push_str(part);
                if !vfs.exists(&dir_path).await? {
                    vfs.create_directory(&dir_path).await?;
                }
            }
        }

        vfs.create_document(path, content.to_string()).await?;
    }

    Ok(engine)
}

/// Helper to create a bundle with specific content, as bytes.
pub async fn create_test_bundle(
    files: Vec<(&str, &str)>,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let engine = create_test_engine(files).await?;
    Ok(engine.to_bytes(None).await?)
}

/// Load an Engine from bundle bytes (uses local filesystem-backed storage).
pub async fn load_from_bundle(bundle_bytes: Vec<u8>) -> Result<Engine, Box<dyn std::error::Error>> {
    Ok(Engine::from_bytes(bundle_bytes).await?)
}

/// Two-peer in-process sync harness. Binds a `WebSocketServer` on the first engine's
/// repository, then connects the second engine to it as an outgoing peer. Grounded in
/// `relay-rust`'s `websocket_server.rs` accept loop, with an in-process listener in
/// place of a standalone relay process, since this crate has no sibling server to spawn.
pub struct TwoPeerHarness {
    server_addr: SocketAddr,
    _server_task: tokio::task::JoinHandle<()>,
}

impl TwoPeerHarness {
    /// Start a listener fronting `server_engine`'s repository and return a harness that
    /// can connect arbitrary peers to it.
    pub async fn start(server_engine: &Engine) -> Result<Self, Box<dyn std::error::Error>> {
        let server = websocket::WebSocketServer::bind(
            server_engine.samod(),
            "127.0.0.1:0".parse().unwrap(),
        )
        .await?;
        let server_addr = server.local_addr()?;

        let server_task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Ok(Self {
            server_addr,
            _server_task: server_task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.server_addr)
    }

    /// Connect `client_engine` to the harness's server as an outgoing peer and wait for
    /// the handshake to complete.
    pub async fn connect(&self, client_engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
        client_engine.connect_websocket(&self.url()).await?;
        Ok(())
    }
}

/// Give two connected peers a moment to exchange sync messages.
pub async fn wait_for_sync(timeout: Duration) {
    sleep(timeout).await;
}

/// Check if a port is available.
pub fn is_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}
