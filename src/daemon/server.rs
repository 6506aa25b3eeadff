//! RPC server — TCP transport loop and service lifecycle.
//!
//! One thread runs the transport loop: accept a connection, read one
//! request line, dispatch it, write exactly one reply line. The
//! controller and the signal watcher live on other threads and talk to
//! the loop only through the shared running flag, which the loop
//! re-checks at every poll interval.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::service::QaService;

use super::dispatch::dispatch;
use super::protocol::{decode_request, encode_response, Request, Response};

/// Sleep step while waiting for the loop to observe the running flag.
const WAIT_STEP: Duration = Duration::from_millis(10);

/// Lifecycle state shared between the controller, the loop thread and
/// the signal watcher.
struct Lifecycle {
    running: AtomicBool,
    loop_exited: AtomicBool,
    cleaned_up: AtomicBool,
}

/// The RPC server: a bound listener plus the lifecycle controls around
/// the transport loop.
pub struct RpcServer {
    config: ServerConfig,
    lifecycle: Arc<Lifecycle>,
    listener: Option<TcpListener>,
    service: Option<QaService>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl RpcServer {
    /// Bind the endpoint. Binding happens here rather than inside the
    /// loop so a failure is reported synchronously in both run modes.
    pub fn bind(config: ServerConfig, service: QaService) -> Result<RpcServer> {
        let addr = config.bind_addr();
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("failed to bind {}", addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to set listener nonblocking")?;
        let local_addr = listener
            .local_addr()
            .context("failed to read local address")?;
        info!(addr = %local_addr, "server listening");

        Ok(RpcServer {
            config,
            lifecycle: Arc::new(Lifecycle {
                running: AtomicBool::new(false),
                loop_exited: AtomicBool::new(false),
                cleaned_up: AtomicBool::new(false),
            }),
            listener: Some(listener),
            service: Some(service),
            handle: None,
            local_addr,
        })
    }

    /// Address actually bound. Resolves port 0 to the assigned port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.running.load(Ordering::SeqCst)
    }

    /// Run the transport loop on a background thread. Warns and returns
    /// if the server is already running or has already been run.
    pub fn start(&mut self) {
        if self.lifecycle.running.load(Ordering::SeqCst) {
            warn!("server already running");
            return;
        }
        let (listener, service) = match self.take_parts() {
            Some(parts) => parts,
            None => {
                warn!("server already ran; cannot start again");
                return;
            }
        };

        self.lifecycle.running.store(true, Ordering::SeqCst);
        let lifecycle = Arc::clone(&self.lifecycle);
        let config = self.config.clone();
        self.handle = Some(thread::spawn(move || {
            run_loop(listener, service, &config, &lifecycle);
        }));
        info!("server thread started");
    }

    /// Run the transport loop on the calling thread. Returns once the
    /// running flag is cleared by `stop` or a termination signal.
    pub fn run(&mut self) -> Result<()> {
        if self.lifecycle.running.load(Ordering::SeqCst) {
            bail!("server already running");
        }
        let (listener, service) = match self.take_parts() {
            Some(parts) => parts,
            None => bail!("server already ran; cannot run again"),
        };

        self.lifecycle.running.store(true, Ordering::SeqCst);
        run_loop(listener, service, &self.config, &self.lifecycle);
        Ok(())
    }

    fn take_parts(&mut self) -> Option<(TcpListener, QaService)> {
        match (self.listener.take(), self.service.take()) {
            (Some(listener), Some(service)) => Some((listener, service)),
            _ => None,
        }
    }

    /// Clear the running flag and wait (bounded) for the loop to exit.
    pub fn stop(&mut self) {
        info!("stopping server");
        self.lifecycle.running.store(false, Ordering::SeqCst);
        let grace = self.config.shutdown_grace();
        if let Some(handle) = self.handle.take() {
            if wait_bounded(grace, || handle.is_finished()) {
                if handle.join().is_err() {
                    error!("server thread panicked");
                }
                info!("server stopped");
            } else {
                warn!(
                    grace_ms = self.config.shutdown_grace_ms,
                    "server thread did not exit within grace period; detaching"
                );
            }
        }
    }

    /// Release server resources. Idempotent and safe under concurrent
    /// triggers (explicit call, drop, signal watcher); problems are
    /// logged, never propagated, so teardown always completes.
    pub fn cleanup(&mut self) {
        if self.lifecycle.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("cleaning up server resources");
        self.lifecycle.running.store(false, Ordering::SeqCst);
        // A server that never ran still holds these.
        self.listener = None;
        self.service = None;
        if let Some(handle) = self.handle.take() {
            if wait_bounded(self.config.shutdown_grace(), || handle.is_finished()) {
                if handle.join().is_err() {
                    error!("server thread panicked");
                }
            } else {
                warn!("transport loop still running at cleanup; detaching");
            }
        }
        info!("server cleanup complete");
    }

    /// Install SIGINT/SIGTERM handling. On the first signal the watcher
    /// clears the running flag, waits (bounded) for the loop to exit so
    /// an in-flight request finishes with its reply delivered, and exits
    /// the process with code 0.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let signals =
            Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
        let lifecycle = Arc::clone(&self.lifecycle);
        let grace = self.config.shutdown_grace();
        let _ = thread::Builder::new()
            .name("lectern-signals".to_string())
            .spawn(move || signal_watcher(signals, lifecycle, grace))
            .context("failed to spawn signal watcher")?;
        Ok(())
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn signal_watcher(mut signals: Signals, lifecycle: Arc<Lifecycle>, grace: Duration) {
    if let Some(signal) = signals.forever().next() {
        info!(signal, "termination signal received; shutting down");
        let was_running = lifecycle.running.swap(false, Ordering::SeqCst);
        if was_running && !wait_bounded(grace, || lifecycle.loop_exited.load(Ordering::SeqCst)) {
            warn!("transport loop did not exit within grace period");
        }
        lifecycle.cleaned_up.store(true, Ordering::SeqCst);
        info!("shutdown complete");
        std::process::exit(0);
    }
}

/// Poll `done` until it reports true or the grace period elapses.
fn wait_bounded(grace: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + grace;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(WAIT_STEP);
    }
    true
}

/// The transport loop. Exits when the running flag clears; drops the
/// listener (closing the socket) on the way out.
fn run_loop(
    listener: TcpListener,
    mut service: QaService,
    config: &ServerConfig,
    lifecycle: &Lifecycle,
) {
    let poll = config.poll_interval();
    info!(poll_ms = config.poll_interval_ms, "transport loop entered");

    while lifecycle.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "client connected");
                if let Err(e) = serve_connection(stream, &mut service, poll, lifecycle) {
                    warn!(error = %e, "client connection ended with error");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(poll);
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                thread::sleep(poll);
            }
        }
    }

    drop(listener);
    info!("transport loop exited; socket closed");
    lifecycle.loop_exited.store(true, Ordering::SeqCst);
}

/// Serve one client connection: read one request line, write exactly one
/// reply line, repeat. Read timeouts re-check the running flag so a
/// quiet client cannot stall shutdown.
fn serve_connection(
    stream: TcpStream,
    service: &mut QaService,
    poll: Duration,
    lifecycle: &Lifecycle,
) -> Result<()> {
    // Accepted sockets inherit the listener's nonblocking flag on some
    // platforms; the read timeout needs a blocking socket.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(poll))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut line = Vec::new();

    while lifecycle.running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                debug!("client disconnected");
                return Ok(());
            }
            Ok(_) => {
                // Lossy decode so a non-UTF-8 line still gets its reply.
                let text = String::from_utf8_lossy(&line);
                let response = handle_line(service, &text);
                writeln!(writer, "{}", encode_response(&response))?;
                line.clear();
            }
            // Poll-interval timeout; bytes of a partial request stay in
            // `line` until the rest arrives.
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Decode and dispatch one request line. A line that fails to decode is
/// still answered, with a server error.
fn handle_line(service: &mut QaService, line: &str) -> Response {
    match decode_request(line.trim()) {
        Ok(request) => dispatch(service, request),
        Err(e) => Response::error(format!("Server error: {}", e)),
    }
}

/// Send one request to a running server and wait for its reply.
pub fn send_request(addr: &str, request: &Request) -> Result<Response> {
    let mut stream =
        TcpStream::connect(addr).with_context(|| format!("failed to connect to {}", addr))?;

    let request_json = serde_json::to_string(request)?;
    writeln!(stream, "{}", request_json)?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: Response =
        serde_json::from_str(&response_line).context("failed to decode server response")?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PlaceholderFactory;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            poll_interval_ms: 20,
            shutdown_grace_ms: 2000,
        }
    }

    fn test_server() -> RpcServer {
        let service = QaService::new(Box::new(PlaceholderFactory));
        RpcServer::bind(test_config(), service).expect("bind")
    }

    #[test]
    fn bind_resolves_port_zero() {
        let server = test_server();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn bind_conflict_is_synchronous() {
        let server = test_server();
        let mut config = test_config();
        config.port = server.local_addr().port();
        let service = QaService::new(Box::new(PlaceholderFactory));
        assert!(RpcServer::bind(config, service).is_err());
    }

    #[test]
    fn start_serve_stop() {
        let mut server = test_server();
        let addr = server.local_addr().to_string();
        server.start();
        assert!(server.is_running());

        let response = send_request(&addr, &Request::new("get_preset_names")).expect("request");
        assert!(matches!(response, Response::Success { .. }));

        server.stop();
        assert!(!server.is_running());
        // Teardown is idempotent.
        server.stop();
        server.cleanup();
        server.cleanup();
    }

    #[test]
    fn start_twice_keeps_one_loop() {
        let mut server = test_server();
        let addr = server.local_addr().to_string();
        server.start();
        server.start();

        let response = send_request(&addr, &Request::new("get_status")).expect("request");
        assert!(matches!(response, Response::NotInitialized { .. }));
        server.stop();
    }

    #[test]
    fn drop_without_stop_shuts_down() {
        let mut server = test_server();
        server.start();
        drop(server);
    }

    #[test]
    fn quiet_connection_does_not_stall_the_loop() {
        let mut server = test_server();
        let addr = server.local_addr().to_string();
        server.start();

        // Connect, stay silent past several poll intervals, then talk.
        let mut stream = TcpStream::connect(&addr).expect("connect");
        thread::sleep(Duration::from_millis(100));
        let request = serde_json::to_string(&Request::new("get_preset_names")).unwrap();
        writeln!(stream, "{}", request).unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(line.contains("\"success\""));

        server.stop();
    }
}
