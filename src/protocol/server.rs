use std::{
    error::Error,
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    codec::{self, Mapping},
    engine::QueryEngine,
};

use super::{
    context::Context,
    dispatcher::{NoResultsMode, RequestDispatcher},
    error_chain,
    socket::{DirectSocket, Relay, ReplySocket, WorkerSocket},
    thread::WorkerPool,
    transaction::{TransactionSession, WorkerId},
    transport::TransportError,
};

pub const DEFAULT_ADDRESS: &str = "0.0.0.0:5555";
pub const MAX_THREADS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("thread count must be between 1 and {MAX_THREADS}, got {0}")]
    Threads(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub threads: usize,
    pub no_results: NoResultsMode,
}

impl ServerConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            threads: 1,
            no_results: NoResultsMode::default(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_no_results(mut self, mode: NoResultsMode) -> Self {
        self.no_results = mode;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_THREADS).contains(&self.threads) {
            return Err(ConfigError::Threads(self.threads));
        }
        Ok(())
    }
}

enum Endpoint {
    Direct(DirectSocket),
    Relay(TcpListener),
}

/// Query server. With one thread a single worker owns the listening socket; with more, a
/// relay accepts connections and spreads their requests over a pool of workers.
pub struct Server<E: QueryEngine> {
    config: ServerConfig,
    address: SocketAddr,
    endpoint: Endpoint,
    dispatcher: Arc<RequestDispatcher<E>>,
    context: Context,
}

impl<E: QueryEngine> Server<E> {
    /// Validates `config` and binds its address.
    pub fn bind(config: ServerConfig, engine: Arc<E>) -> Result<Self, Box<dyn Error>> {
        config.validate()?;
        let context = Context::new();

        let endpoint = if config.threads == 1 {
            Endpoint::Direct(DirectSocket::bind(config.address, context.clone())?)
        } else {
            Endpoint::Relay(TcpListener::bind(config.address)?)
        };
        let address = match &endpoint {
            Endpoint::Direct(socket) => socket.local_addr(),
            Endpoint::Relay(listener) => listener.local_addr()?,
        };

        Ok(Self {
            dispatcher: Arc::new(RequestDispatcher::new(engine, config.no_results)),
            config,
            address,
            endpoint,
            context,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Handle for stopping the server from another thread.
    pub fn context(&self) -> Context {
        self.context.clone()
    }

    /// Serves until the context is terminated.
    pub fn run(self) -> Result<(), TransportError> {
        info!(
            "listening at {} with {} worker(s)",
            self.address, self.config.threads
        );
        match self.endpoint {
            Endpoint::Direct(mut socket) => {
                serve(&mut socket, &*self.dispatcher, WorkerId(0), &self.context);
                Ok(())
            }
            Endpoint::Relay(listener) => {
                let (relay, queue) = Relay::new(listener, self.config.threads, &self.context)?;

                let dispatcher = Arc::clone(&self.dispatcher);
                let context = self.context.clone();
                let pool = WorkerPool::new(self.config.threads, move |worker| {
                    let mut socket = WorkerSocket::new(Arc::clone(&queue));
                    serve(&mut socket, &*dispatcher, worker, &context);
                })?;

                relay.run(&self.context);
                drop(pool);
                Ok(())
            }
        }
    }
}

/// Worker loop: receive, dispatch, reply, until the context is terminated.
pub(crate) fn serve<S, E>(
    socket: &mut S,
    dispatcher: &RequestDispatcher<E>,
    worker: WorkerId,
    context: &Context,
) where
    S: ReplySocket,
    E: QueryEngine,
{
    let mut session = dispatcher.session(worker);
    debug!("worker {worker} serving");

    while !context.is_terminated() {
        let request = match socket.recv() {
            Ok(request) => request,
            Err(TransportError::Terminated) => break,
            Err(e @ TransportError::Poisoned) => {
                warn!("worker {worker} giving up: {e}");
                break;
            }
            Err(e) => {
                if context.is_terminated() {
                    break;
                }
                warn!("worker {worker} failed to receive: {e}");
                continue;
            }
        };

        match handle(socket, dispatcher, &mut session, &request) {
            Ok(()) => {}
            Err(TransportError::Terminated) => break,
            Err(e) => warn!("worker {worker} failed to reply: {e}"),
        }
    }

    if let Err(e) = dispatcher.registry().suspend_current(&mut session) {
        warn!("worker {worker} could not release its transaction: {e}");
    }
    debug!("worker {worker} stopped");
}

fn handle<S, E>(
    socket: &mut S,
    dispatcher: &RequestDispatcher<E>,
    session: &mut TransactionSession<E::Transaction>,
    request: &[u8],
) -> Result<(), TransportError>
where
    S: ReplySocket,
    E: QueryEngine,
{
    let worker = session.worker();
    let request = match codec::decode(request) {
        Ok(request) => request,
        Err(e) => {
            warn!("worker {worker} received a malformed request: {e}");
            return socket.send(error_frame(&e), false);
        }
    };
    debug!("worker {worker} received {request}");

    let mut reply = match dispatcher.dispatch(session, request) {
        Ok(reply) => reply,
        Err(e) => {
            warn!("worker {worker} request failed: {e}");
            return socket.send(error_frame(&e), false);
        }
    };

    for frame in &mut reply {
        match frame {
            Ok(frame) => socket.send(frame.body, frame.more)?,
            Err(e) => {
                warn!("worker {worker} failed to encode reply: {e}");
                return socket.send(error_frame(&e), false);
            }
        }
    }
    trace!(
        "worker {worker} replied with {} rows in {} bytes",
        reply.rows(),
        reply.bytes()
    );
    Ok(())
}

/// Single reply part describing `error`.
pub(crate) fn error_frame(error: &(dyn Error + 'static)) -> Vec<u8> {
    let mut frame = Mapping::new();
    frame.insert("error", error.to_string());
    frame.insert("exception", error_chain(error));
    codec::encode(&frame.into()).unwrap_or_else(|_| codec::empty_mapping())
}
