use may::coroutine::JoinHandle;
use may_minihttp::{HttpServerWithHeaders, HttpService};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::info;

/// Request headers accepted per request; gateways add quite a few.
pub const MAX_REQUEST_HEADERS: usize = 32;

/// `may_minihttp` server around any [`HttpService`].
pub struct HttpServer<T>(pub T);

/// Handle on a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll the listening socket until it accepts connections.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the server is not accepting after ~250ms.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Cancel the accept coroutine and wait for it to finish.
    pub fn stop(self) {
        info!(addr = %self.addr, "Stopping server");
        // SAFETY: cancelling our own accept coroutine during shutdown; the
        // handle is still valid because we own it.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    /// Block until the server coroutine exits.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl<T: HttpService + Clone + Send + Sync + 'static> HttpServer<T> {
    /// Bind `addr` and start serving.
    ///
    /// # Errors
    ///
    /// Fails if the address does not resolve or cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let handle = HttpServerWithHeaders::<_, MAX_REQUEST_HEADERS>(self.0).start(addr)?;
        info!(addr = %addr, max_headers = MAX_REQUEST_HEADERS, "Server listening");
        Ok(ServerHandle { addr, handle })
    }
}
