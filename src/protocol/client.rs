use std::net::{TcpStream, ToSocketAddrs};

use log::debug;
use thiserror::Error;

use crate::{
    codec::{self, CodecError, Value},
    engine::Params,
};

use super::{
    TX_ID,
    request::{QueryRequest, TxDirective},
    transaction::TxId,
    transport::{ProtocolTransport, TransportError},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("server did not return a transaction id")]
    MissingTxId,
}

/// Blocking client holding one connection. Each call sends one request and waits for the
/// whole reply.
pub struct Client {
    transport: ProtocolTransport<TcpStream>,
}

impl Client {
    pub fn connect(address: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).map_err(TransportError::from)?;
        Ok(Self {
            transport: ProtocolTransport::new(stream),
        })
    }

    /// Sends `request` and returns every decoded reply part.
    pub fn request(&mut self, request: impl Into<Value>) -> Result<Vec<Value>, ClientError> {
        let request = codec::encode(&request.into())?;
        self.transport.write_message(&[request])?;

        let parts = self.transport.read_message()?;
        debug!("received {} reply parts", parts.len());
        parts
            .iter()
            .map(|part| codec::decode(part).map_err(ClientError::from))
            .collect()
    }

    pub fn query(&mut self, query: &str, params: Params) -> Result<Vec<Value>, ClientError> {
        self.request(QueryRequest::query(query).with_params(params))
    }

    /// Opens a transaction and returns its id.
    pub fn begin(&mut self) -> Result<TxId, ClientError> {
        let reply = self.request(
            QueryRequest::new()
                .with_tx(TxDirective::Begin)
                .with_stats(true),
        )?;
        reply
            .last()
            .and_then(|info| info.get(TX_ID))
            .and_then(Value::as_i64)
            .ok_or(ClientError::MissingTxId)
    }

    pub fn commit(&mut self, tx_id: TxId) -> Result<Vec<Value>, ClientError> {
        self.finish(tx_id, TxDirective::Commit)
    }

    pub fn rollback(&mut self, tx_id: TxId) -> Result<Vec<Value>, ClientError> {
        self.finish(tx_id, TxDirective::Rollback)
    }

    fn finish(&mut self, tx_id: TxId, directive: TxDirective) -> Result<Vec<Value>, ClientError> {
        self.request(
            QueryRequest::new()
                .with_tx(directive)
                .with_tx_id(tx_id)
                .with_stats(true),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{
        codec::Mapping,
        graph::MemoryEngine,
        protocol::{Context, Server, ServerConfig},
    };

    fn serve() -> (Client, Context, thread::JoinHandle<()>) {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Server::bind(config, Arc::new(MemoryEngine::new())).unwrap();
        let client = Client::connect(server.local_addr()).unwrap();
        let context = server.context();
        let handle = thread::spawn(move || server.run().unwrap());
        (client, context, handle)
    }

    #[test]
    fn create_returns_header_row_and_info() {
        let (mut client, context, handle) = serve();
        let reply = client
            .request(QueryRequest::query("create (n) return n").with_stats(true))
            .unwrap();

        assert_eq!(reply.len(), 3);
        assert_eq!(reply[0], Value::List(vec![Value::from("n")]));
        assert_eq!(
            reply[1],
            Value::List(vec![Value::Map(vec![("id".into(), Value::Int(0))])])
        );
        assert_eq!(reply[2].get("rows"), Some(&Value::Int(1)));
        assert_eq!(reply[2].get("updates"), Some(&Value::Bool(true)));
        assert_eq!(reply[2].get("nodes_created"), Some(&Value::Int(1)));

        drop(client);
        context.terminate();
        handle.join().unwrap();
    }

    #[test]
    fn read_of_empty_graph_is_header_only() {
        let (mut client, context, handle) = serve();
        let reply = client.request("start n return n.name").unwrap();

        assert_eq!(reply, vec![Value::List(vec![Value::from("n.name")])]);

        drop(client);
        context.terminate();
        handle.join().unwrap();
    }

    #[test]
    fn begin_then_rollback() {
        let (mut client, context, handle) = serve();
        let tx_id = client.begin().unwrap();
        assert_ne!(tx_id, -1);

        let mut params = Mapping::new();
        params.insert("props", Value::Map(vec![("name".into(), Value::from("tmp"))]));
        client
            .request(
                QueryRequest::query("create (n $props)")
                    .with_params(params)
                    .with_tx_id(tx_id),
            )
            .unwrap();

        let reply = client.rollback(tx_id).unwrap();
        assert_eq!(reply[0].get("tx_id"), Some(&Value::Int(-1)));
        assert_eq!(reply[0].get("tx"), Some(&Value::from("rollback")));
        assert_eq!(client.query("start n return n", Mapping::new()).unwrap().len(), 1);

        drop(client);
        context.terminate();
        handle.join().unwrap();
    }

    #[test]
    fn server_errors_arrive_as_a_single_part() {
        let (mut client, context, handle) = serve();
        let reply = client.request("fetch everything").unwrap();

        assert_eq!(reply.len(), 1);
        assert!(reply[0].get("error").and_then(Value::as_str).is_some());
        assert!(reply[0].get("exception").is_some());

        drop(client);
        context.terminate();
        handle.join().unwrap();
    }
}
