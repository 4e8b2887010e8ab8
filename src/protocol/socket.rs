//! Reply sockets: where a worker receives requests and sends reply parts.
//!
//! A worker alternates strictly between one [`recv`](ReplySocket::recv) and the parts of
//! one reply, the last of them sent with `more` unset.
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use log::{debug, info, warn};

use super::{
    context::Context,
    transport::{Part, ProtocolTransport, TransportError},
};

pub trait ReplySocket {
    /// Blocks until the next request arrives and returns its first part.
    fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Sends one reply part to the peer of the last received request.
    fn send(&mut self, body: Vec<u8>, more: bool) -> Result<(), TransportError>;
}

/// Streams of open connections, kept so termination can shut them down.
#[derive(Clone, Default)]
pub(crate) struct Connections {
    streams: Arc<Mutex<HashMap<u64, TcpStream>>>,
}

impl Connections {
    pub(crate) fn insert(&self, id: u64, stream: &TcpStream) {
        match (stream.try_clone(), self.streams.lock()) {
            (Ok(stream), Ok(mut streams)) => {
                streams.insert(id, stream);
            }
            (Err(e), _) => warn!("cannot track connection {id}: {e}"),
            (_, Err(_)) => warn!("cannot track connection {id}: lock poisoned"),
        }
    }

    pub(crate) fn remove(&self, id: u64) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.remove(&id);
        }
    }

    pub(crate) fn shutdown_all(&self) {
        if let Ok(streams) = self.streams.lock() {
            for stream in streams.values() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Wakes a thread blocked in `accept` on `address` by connecting to it.
pub(crate) fn knock(mut address: SocketAddr) {
    if address.ip().is_unspecified() {
        let loopback = match address {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        address.set_ip(loopback);
    }
    if let Err(e) = TcpStream::connect(address) {
        debug!("wake-up connection to {address} failed: {e}");
    }
}

/// Socket for a server with a single worker. It owns the TCP endpoint: a relay thread
/// accepts connections and queues their requests, so every connected peer is served in
/// turn, one request at a time.
pub struct DirectSocket {
    address: SocketAddr,
    worker: WorkerSocket,
}

impl DirectSocket {
    pub fn bind(address: impl ToSocketAddrs, context: Context) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)?;
        let address = listener.local_addr()?;
        let (relay, queue) = Relay::new(listener, 1, &context)?;

        thread::Builder::new()
            .name("relay".to_string())
            .spawn(move || relay.run(&context))?;

        Ok(Self {
            address,
            worker: WorkerSocket::new(queue),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }
}

impl ReplySocket for DirectSocket {
    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.worker.recv()
    }

    fn send(&mut self, body: Vec<u8>, more: bool) -> Result<(), TransportError> {
        self.worker.send(body, more)
    }
}

/// A request handed from the relay to a worker, with the channel its reply goes back on.
pub(crate) struct Envelope {
    pub(crate) parts: Vec<Vec<u8>>,
    pub(crate) reply: Sender<Part>,
}

pub(crate) enum Delivery {
    Request(Envelope),
    Terminate,
}

/// Socket for a pool worker, fed by the relay through a queue shared by all workers.
pub struct WorkerSocket {
    queue: Queue,
    reply: Option<Sender<Part>>,
}

impl WorkerSocket {
    pub(crate) fn new(queue: Queue) -> Self {
        Self { queue, reply: None }
    }
}

impl ReplySocket for WorkerSocket {
    fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.reply = None;
        let delivery = self
            .queue
            .lock()
            .map_err(|_| TransportError::Poisoned)?
            .recv();

        match delivery {
            Ok(Delivery::Request(envelope)) => {
                let mut parts = envelope.parts;
                if parts.is_empty() {
                    return Err(TransportError::Closed);
                }
                self.reply = Some(envelope.reply);
                Ok(parts.swap_remove(0))
            }
            Ok(Delivery::Terminate) | Err(_) => Err(TransportError::Terminated),
        }
    }

    fn send(&mut self, body: Vec<u8>, more: bool) -> Result<(), TransportError> {
        let reply = self.reply.as_ref().ok_or(TransportError::Closed)?;
        reply
            .send(Part::new(body, more))
            .map_err(|_| TransportError::Closed)?;
        if !more {
            self.reply = None;
        }
        Ok(())
    }
}

pub(crate) type Queue = Arc<Mutex<Receiver<Delivery>>>;

/// Accepts connections and forwards whole requests onto a queue shared by `workers`
/// workers, with one forwarding thread per connection.
pub(crate) struct Relay {
    listener: TcpListener,
    queue: Sender<Delivery>,
    connections: Connections,
}

impl Relay {
    /// Wraps `listener` and registers the wakers that stop the relay and its workers.
    pub(crate) fn new(
        listener: TcpListener,
        workers: usize,
        context: &Context,
    ) -> Result<(Self, Queue), TransportError> {
        let local = listener.local_addr()?;
        let (queue, receiver) = mpsc::channel();
        let connections = Connections::default();

        let open = connections.clone();
        let stop = Mutex::new(queue.clone());
        context.on_terminate(move || {
            if let Ok(stop) = stop.lock() {
                for _ in 0..workers {
                    let _ = stop.send(Delivery::Terminate);
                }
            }
            open.shutdown_all();
            knock(local);
        });

        let relay = Self {
            listener,
            queue,
            connections,
        };
        Ok((relay, Arc::new(Mutex::new(receiver))))
    }

    /// Accept loop; returns once the context is terminated.
    pub(crate) fn run(self, context: &Context) {
        let mut next_id = 0u64;
        for stream in self.listener.incoming() {
            if context.is_terminated() {
                break;
            }
            match stream {
                Ok(stream) => {
                    next_id += 1;
                    let id = next_id;
                    self.connections.insert(id, &stream);
                    let queue = self.queue.clone();
                    let open = self.connections.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("relay-{id}"))
                        .spawn(move || {
                            if let Err(e) = forward(stream, &queue) {
                                debug!("connection {id} closed: {e}");
                            }
                            open.remove(id);
                        });
                    if let Err(e) = spawned {
                        warn!("cannot spawn relay thread: {e}");
                        self.connections.remove(id);
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        info!("relay stopped");
    }
}

/// Moves whole requests from `stream` to the queue and reply parts back, without looking
/// inside either.
fn forward(stream: TcpStream, queue: &Sender<Delivery>) -> Result<(), TransportError> {
    if let Ok(peer) = stream.peer_addr() {
        debug!("relaying for {peer}");
    }
    let mut transport = ProtocolTransport::new(stream);

    loop {
        let parts = match transport.read_message() {
            Ok(parts) => parts,
            Err(TransportError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };

        let (reply, replies) = mpsc::channel();
        queue
            .send(Delivery::Request(Envelope { parts, reply }))
            .map_err(|_| TransportError::Terminated)?;

        loop {
            let part = replies.recv().map_err(|_| TransportError::Terminated)?;
            let more = part.more;
            transport.write_part(&part)?;
            if !more {
                break;
            }
        }
    }
}
