//! Test exporter management.
//!
//! Spawns and manages moodledb-exporter instances for integration testing.

use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Reserve a local port that nothing is listening on.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// A running exporter process.
pub struct TestExporter {
    child: Child,
    port: u16,
}

impl TestExporter {
    /// Spawn an exporter whose database lives at a port with no server behind it.
    pub async fn spawn_without_database() -> anyhow::Result<Self> {
        let port = free_port();
        let db_port = free_port();
        Self::spawn(
            port,
            &[
                ("DB_HOST", "127.0.0.1"),
                ("DB_PORT", &db_port.to_string()),
                ("CONNECT_TIMEOUT", "1"),
                ("RECONNECT_BACKOFF_MAX", "1"),
            ],
        )
        .await
    }

    /// Spawn an exporter listening on `port` with extra environment.
    pub async fn spawn(port: u16, env: &[(&str, &str)]) -> anyhow::Result<Self> {
        let child = command(env)
            .env("SERVER_PORT", port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let exporter = Self { child, port };
        exporter.wait_until_ready().await?;
        Ok(exporter)
    }

    /// Wait until the exporter is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Exporter failed to start within 5 seconds")
    }

    /// Issue a GET request and return the raw HTTP response.
    pub async fn get(&self, path: &str) -> anyhow::Result<String> {
        let mut stream = TcpStream::connect(("127.0.0.1", self.port)).await?;
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    /// Whether the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for TestExporter {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Command for the exporter binary with a clean configuration environment.
pub fn command(env: &[(&str, &str)]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_moodledb-exporter"));
    for key in [
        "DB_HOST",
        "DB_PORT",
        "DB_USER",
        "DB_PASSWORD",
        "DB_NAME",
        "SLEEP_INTERVAL",
        "SERVER_PORT",
        "CONNECT_TIMEOUT",
        "QUERY_TIMEOUT",
        "RECONNECT_BACKOFF_MAX",
    ] {
        cmd.env_remove(key);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd
}
