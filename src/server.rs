//! Server (spec §4.6): listening socket, accept loop, fleet of
//! connections, signal-driven shutdown, built on the readiness event loop
//! `mio` supplies (the role `libev`'s `ev_loop` plays in the original C
//! source).

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};

use crate::auth::{Authenticator, PamAuthenticator};
use crate::conn::{Connection, ServerContext};
use crate::directory::IdRange;
use crate::error::StartupError;
use crate::source::{AccountSource, SystemAccountSource};
use crate::tls::TlsContext;

const ACCEPT_TOKEN: Token = Token(0);

/// Everything `Server::init` needs that the embedding process is
/// responsible for parsing and validating (spec §6, "Environment").
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub basedn: String,
    pub root_user: String,
    pub anon_ok: bool,
    pub uid_ranges: Vec<IdRange>,
    pub gid_ranges: Vec<IdRange>,
    pub tls: Option<(String, String, Option<String>)>,
    pub pam_service: String,
}

/// A connection plus whether its socket currently holds an mio registration.
/// Tracked separately because `Registry::register` and `::reregister` are
/// not interchangeable: reregistering a never-registered (or since
/// deregistered) source fails.
struct ConnEntry {
    conn: Connection,
    registered: bool,
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    ctx: ServerContext,
    connections: HashMap<Token, ConnEntry>,
    next_token: usize,
    next_conn_id: u64,
    shutdown: Arc<AtomicBool>,
    shutting_down: bool,
    hangup: Arc<AtomicBool>,
}

impl Server {
    /// Construct the TLS context if cert paths were supplied; fails if it
    /// can't be built (spec §4.6 `init`, §7 "Process-fatal").
    pub fn init(config: ServerConfig) -> Result<Self, StartupError> {
        let tls = match config.tls {
            Some((cert, key, ca)) => {
                let context = TlsContext::new(&cert, &key, ca.as_deref())
                    .map_err(|e| StartupError::Tls(Box::new(e)))?;
                Some(Rc::new(context))
            }
            None => None,
        };

        let mut listener = TcpListener::bind(config.bind).map_err(StartupError::Bind)?;
        let poll = Poll::new().map_err(StartupError::Bind)?;
        poll.registry()
            .register(&mut listener, ACCEPT_TOKEN, Interest::READABLE)
            .map_err(StartupError::Bind)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let hangup = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
            .map_err(StartupError::Bind)?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
            .map_err(StartupError::Bind)?;
        signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&hangup))
            .map_err(StartupError::Bind)?;

        let accounts: Rc<dyn AccountSource> = Rc::new(SystemAccountSource);
        // Root uid is resolved here, after any privilege/chroot transition
        // the host process has already performed (spec §4.6).
        let authenticator: Rc<RefCell<dyn Authenticator>> =
            Rc::new(RefCell::new(PamAuthenticator::new(config.pam_service)));

        Ok(Server {
            poll,
            listener,
            ctx: ServerContext {
                basedn: config.basedn,
                root_user: config.root_user,
                anon_ok: config.anon_ok,
                uid_ranges: config.uid_ranges,
                gid_ranges: config.gid_ranges,
                tls,
                accounts,
                authenticator,
            },
            connections: HashMap::new(),
            next_token: 1,
            next_conn_id: 1,
            shutdown,
            shutting_down: false,
            hangup,
        })
    }

    /// Drives the event loop until shutdown has been signalled and every
    /// connection has drained ("the process exits when the event loop
    /// empties", spec §4.6 `stop()`).
    pub fn start(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        info!("nssldapd listening");
        loop {
            self.poll.poll(&mut events, Some(Duration::from_millis(200)))?;

            if self.hangup.swap(false, Ordering::Relaxed) {
                info!("received SIGHUP; configuration reload is not implemented");
            }

            if self.shutdown.load(Ordering::Relaxed) && !self.shutting_down {
                self.shutting_down = true;
                self.stop();
            }

            if !self.shutting_down {
                for event in events.iter() {
                    if event.token() == ACCEPT_TOKEN {
                        self.accept();
                    }
                }
            }

            // Every live connection is driven on every wakeup, not just the
            // ones with a readiness event this tick: a delay timer expiring
            // with no socket activity from the peer has no mio event of its
            // own, so the 200ms poll timeout is what re-drives it.
            let tokens: Vec<Token> = self.connections.keys().copied().collect();
            for token in tokens {
                let Some(entry) = self.connections.get_mut(&token) else { continue };
                entry.conn.respond(&self.ctx);
                match Self::interest_for(&entry.conn) {
                    Some(interest) => {
                        let result = if entry.registered {
                            self.poll.registry().reregister(&mut entry.conn.socket, token, interest)
                        } else {
                            self.poll.registry().register(&mut entry.conn.socket, token, interest)
                        };
                        entry.registered = result.is_ok();
                    }
                    None => {
                        if entry.registered {
                            let _ = self.poll.registry().deregister(&mut entry.conn.socket);
                            entry.registered = false;
                        }
                    }
                }
            }

            self.reap_closed();

            if self.shutting_down && self.connections.is_empty() {
                return Ok(());
            }
        }
    }

    /// Spec §8 invariants 1 and 2: no interest at all (rather than a stray
    /// `READABLE`) while a delay is armed or the recv buffer is full, so a
    /// readable-but-delayed socket doesn't make the loop spin on a no-op
    /// `respond`. The periodic full sweep in `start` is what reconciles this
    /// once the delay clears or the pipeline drains.
    fn interest_for(conn: &Connection) -> Option<Interest> {
        if conn.is_closed() {
            return None;
        }
        match (conn.read_interest(), conn.write_interest()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Accept one socket per invocation, format the peer address, construct
    /// a Connection (spec §4.6, "Accept handler"). Called in a loop here
    /// because edge-triggering isn't used; repeated accepts drain the
    /// backlog built up since the last readiness notification.
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut socket, addr)) => {
                    let peer_ip = addr.ip().to_string();
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) = self.poll.registry().register(&mut socket, token, Interest::READABLE) {
                        warn!("failed to register connection from {peer_ip}: {e}");
                        continue;
                    }
                    let id = self.next_conn_id;
                    self.next_conn_id += 1;
                    info!("connection {id} accepted from {peer_ip}");
                    let conn = Connection::open(id, socket, peer_ip);
                    self.connections.insert(token, ConnEntry { conn, registered: true });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    /// Close each open Connection via the goodbye procedure (spec §4.6
    /// `stop()`). Idempotent with the per-event drive, since `Connection`'s
    /// own `close()` is idempotent.
    fn stop(&mut self) {
        for entry in self.connections.values_mut() {
            entry.conn.close();
            entry.conn.respond(&self.ctx);
        }
    }

    fn reap_closed(&mut self) {
        let closed: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.conn.is_closed())
            .map(|(token, _)| *token)
            .collect();
        for token in closed {
            if let Some(mut entry) = self.connections.remove(&token) {
                if entry.registered {
                    let _ = self.poll.registry().deregister(&mut entry.conn.socket);
                }
                info!("connection {} closed", entry.conn.id);
            }
        }
    }
}
