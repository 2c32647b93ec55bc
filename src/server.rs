//! Mock server lifecycle.
//!
//! A [`MockServer`] is a live double that serves the responses a contract's
//! interactions define. It moves through exactly three states:
//!
//! ```text
//! Inert -> Active -> Released
//! ```
//!
//! and is single-use: once released it cannot be restarted. Release is
//! guaranteed on every exit path: [`MockServer::scope`] releases even when
//! the closure fails, and the `Drop` impl is the backstop for panics and
//! forgotten `stop` calls.

use std::fmt;
use std::ops::Div;
use std::path::{Path, PathBuf};

use url::Url;

use crate::engine::{self, ContractHandle, ServerHandle};
use crate::errors::{EngineError, Result, ServerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Inert,
    Active,
    Released,
}

/// A scoped mock server bound to one contract.
///
/// Obtained from [`Contract::serve`](crate::Contract::serve) in the inert
/// state; nothing is bound until [`MockServer::start`] (or
/// [`MockServer::scope`]) runs.
#[derive(Debug)]
pub struct MockServer {
    contract: ContractHandle,
    host: String,
    port: u16,
    transport: String,
    transport_config: Option<String>,
    state: ServerState,
    handle: Option<ServerHandle>,
    resolved_port: u16,
}

impl MockServer {
    pub(crate) fn new(contract: ContractHandle) -> Self {
        Self {
            contract,
            host: "localhost".to_string(),
            port: 0,
            transport: "http".to_string(),
            transport_config: None,
            state: ServerState::Inert,
            handle: None,
            resolved_port: 0,
        }
    }

    /// Set the address to bind to. Defaults to `localhost`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port to bind to. The default, `0`, lets the engine pick a
    /// free port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the transport. Defaults to `http`.
    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    /// Set transport-specific configuration, typically a JSON string.
    pub fn with_transport_config(mut self, config: impl Into<String>) -> Self {
        self.transport_config = Some(config.into());
        self
    }

    /// Bind the server and start serving the contract's interactions.
    ///
    /// Errors if the server is already active or has been released.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            ServerState::Inert => {}
            ServerState::Active => return Err(ServerError::AlreadyStarted.into()),
            ServerState::Released => return Err(ServerError::AlreadyReleased.into()),
        }

        let (handle, port) = engine::start_mock_server(
            self.contract,
            &self.host,
            self.port,
            &self.transport,
            self.transport_config.as_deref(),
        )?;
        self.handle = Some(handle);
        self.resolved_port = port;
        self.state = ServerState::Active;
        tracing::debug!(url = %self, "mock server started");
        Ok(())
    }

    /// Release the server. Idempotent: releasing an already-released or
    /// never-started server is a no-op, but the server cannot be started
    /// afterwards.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            engine::shutdown_mock_server(handle);
        }
        self.state = ServerState::Released;
    }

    /// Run `f` against the active server, releasing it on every exit path:
    /// the server is stopped whether `f` succeeds or fails.
    pub fn scope<R>(&mut self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        self.start()?;
        let result = f(self);
        self.stop();
        result
    }

    /// The resolved port while active; `0` before start and after release.
    pub fn port(&self) -> u16 {
        if self.handle.is_some() {
            self.resolved_port
        } else {
            0
        }
    }

    /// Address the server is (or will be) bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Transport name.
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Base URL of the server: `transport://host:port`.
    pub fn url(&self) -> Result<Url> {
        Url::parse(&self.to_string())
            .map_err(|e| anyhow::anyhow!("invalid server URL '{}': {}", self, e).into())
    }

    /// Write the contract to a file inside `directory` (default: the
    /// current working directory). The directory is created if missing;
    /// a non-directory path is rejected. Only an active server can write.
    pub fn write_file(&self, directory: Option<&Path>, overwrite: bool) -> Result<PathBuf> {
        let handle = self.handle.ok_or(ServerError::NotRunning)?;

        let directory = match directory {
            Some(directory) => directory.to_path_buf(),
            None => std::env::current_dir().map_err(EngineError::Io)?,
        };
        if !directory.exists() {
            std::fs::create_dir_all(&directory).map_err(EngineError::Io)?;
        } else if !directory.is_dir() {
            return Err(ServerError::NotADirectory { path: directory }.into());
        }

        engine::write_server_file(handle, &directory, overwrite)
    }
}

impl fmt::Display for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.host, self.port())
    }
}

/// Join a path onto the server's base URL: `&server / "users/1"`.
impl Div<&str> for &MockServer {
    type Output = String;

    fn div(self, path: &str) -> String {
        format!("{}/{}", self, path.trim_start_matches('/'))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::debug!(url = %self, "mock server released on drop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Contract;
    use crate::errors::CovenantError;

    fn contract_with_ping(name: &str) -> Contract {
        let contract = Contract::new(name, "provider").unwrap();
        contract
            .upon_receiving("a ping")
            .unwrap()
            .with_request("GET", "/ping")
            .unwrap()
            .will_respond_with(204)
            .unwrap();
        contract
    }

    #[test]
    fn test_port_is_zero_outside_the_active_scope() {
        let contract = contract_with_ping("server-port");
        let mut server = contract.serve();
        assert_eq!(server.port(), 0);

        server.start().unwrap();
        assert_ne!(server.port(), 0);

        server.stop();
        assert_eq!(server.port(), 0);
    }

    #[test]
    fn test_single_use_no_restart_after_release() {
        let contract = contract_with_ping("server-single-use");
        let mut server = contract.serve();

        server.start().unwrap();
        let err = server.start().unwrap_err();
        assert!(matches!(
            err,
            CovenantError::Server(ServerError::AlreadyStarted)
        ));

        server.stop();
        // Releasing again is a no-op.
        server.stop();

        let err = server.start().unwrap_err();
        assert!(matches!(
            err,
            CovenantError::Server(ServerError::AlreadyReleased)
        ));
    }

    #[test]
    fn test_scope_releases_on_error() {
        let contract = contract_with_ping("server-scope-error");
        let mut server = contract.serve();

        let result: Result<()> = server.scope(|_srv| Err(anyhow::anyhow!("caller failure").into()));
        assert!(result.is_err());
        assert_eq!(server.port(), 0);

        // The scope released the server: no re-entry.
        let err = server.start().unwrap_err();
        assert!(matches!(
            err,
            CovenantError::Server(ServerError::AlreadyReleased)
        ));
    }

    #[test]
    fn test_url_and_path_join() {
        let contract = contract_with_ping("server-url");
        let mut server = contract.serve().with_host("127.0.0.1");
        server
            .scope(|srv| {
                let base = srv.url()?;
                assert_eq!(base.scheme(), "http");
                assert_eq!(base.host_str(), Some("127.0.0.1"));
                assert_eq!(base.port(), Some(srv.port()));

                let joined = srv / "/users/1";
                assert_eq!(joined, format!("http://127.0.0.1:{}/users/1", srv.port()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_write_file_requires_active_server() {
        let contract = contract_with_ping("server-write-inert");
        let server = contract.serve();
        let err = server.write_file(None, false).unwrap_err();
        assert!(matches!(
            err,
            CovenantError::Server(ServerError::NotRunning)
        ));
    }

    #[test]
    fn test_write_file_creates_missing_directory() {
        let contract = contract_with_ping("server-write-mkdir");
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("pacts").join("generated");

        let mut server = contract.serve();
        server
            .scope(|srv| {
                let path = srv.write_file(Some(&nested), true)?;
                assert!(path.exists());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_write_file_rejects_non_directory_target() {
        let contract = contract_with_ping("server-write-notdir");
        let tmp = tempfile::tempdir().unwrap();
        let file_path = tmp.path().join("occupied");
        std::fs::write(&file_path, "not a directory").unwrap();

        let mut server = contract.serve();
        let result = server.scope(|srv| {
            let err = srv.write_file(Some(&file_path), true).unwrap_err();
            assert!(matches!(
                err,
                CovenantError::Server(ServerError::NotADirectory { .. })
            ));
            Ok(())
        });
        result.unwrap();
    }

    #[test]
    fn test_drop_releases_active_server() {
        let contract = contract_with_ping("server-drop");
        let mut server = contract.serve();
        server.start().unwrap();
        let port = server.port();
        assert_ne!(port, 0);
        drop(server);

        // The port is free again: binding to it succeeds.
        let listener = std::net::TcpListener::bind(("127.0.0.1", port));
        assert!(listener.is_ok());
    }
}
