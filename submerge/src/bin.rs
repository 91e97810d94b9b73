// Illustrative wiring of the quorum pipeline against a handful of
// in-process nodes. Not a real client: there is no wire format for get
// or put here, only the two-byte handshake, so the demo uses an
// in-memory Store per node and a real loopback listener only to
// exercise the handshake path of SocketResourceFactory.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use submerge_base::{Destination, Key, Node, NodeId, ProtocolCode};
use submerge_net::{FailureDetector, SocketFactoryConfig, SocketResourceFactory};
use submerge_txn::{
    Event, Pipeline, PipelineData, PipelineError, PerformSerialRequests, Store, StoreError,
    StoreValue,
};

/// A single node's data, held entirely in memory. Stands in for the real
/// per-node storage engine, which is out of scope here.
struct MemoryStore {
    data: Mutex<BTreeMap<Key, StoreValue>>,
}

impl Store for MemoryStore {
    fn get(&self, key: &Key) -> Result<StoreValue, StoreError> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::Other(format!("no value for {:?}", key.as_bytes())))
    }

    fn get_all(&self, keys: &[Key]) -> Result<BTreeMap<Key, StoreValue>, StoreError> {
        let data = self.data.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn put(&self, key: &Key, value: StoreValue) -> Result<(), StoreError> {
        self.data.lock().unwrap().insert(key.clone(), value);
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<bool, StoreError> {
        Ok(self.data.lock().unwrap().remove(key).is_some())
    }
}

/// Spawns a loopback listener that performs the "ok" handshake for any
/// protocol code it is offered, then closes. Used only to demonstrate
/// `SocketResourceFactory::create` against a real transport.
fn spawn_handshake_server() -> Destination {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut tag = [0u8; 3];
            if stream.read_exact(&mut tag).is_ok() {
                let _ = stream.write_all(b"ok");
            }
        }
    });
    Destination::new(addr.ip().to_string(), addr.port(), ProtocolCode::new("vp1"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Demonstrate the socket factory's handshake against a real loopback
    // peer and its generational invalidation.
    let factory = SocketResourceFactory::new(SocketFactoryConfig::default());
    let dest = spawn_handshake_server();
    match factory.create(&dest) {
        Ok(socket) => {
            tracing::info!(destination = %dest, "connected and handshook");
            assert!(factory.validate(&dest, &socket));
            factory.mark_destination_closed(&dest);
            assert!(!factory.validate(&dest, &socket), "socket must be invalid after its destination closes");
            factory.destroy(&dest, socket);
        }
        Err(err) => tracing::warn!(%err, "demo handshake failed"),
    }

    // Demonstrate the quorum pipeline: three candidate nodes, one of
    // which is unreachable, required=2 and preferred=3.
    let nodes = vec![
        Node::new(NodeId(1), "node-1", 6666, ProtocolCode::new("vp1")),
        Node::new(NodeId(2), "node-2", 6666, ProtocolCode::new("vp1")),
        Node::new(NodeId(3), "node-3", 6666, ProtocolCode::new("vp1")),
    ];

    let stores: HashMap<NodeId, Arc<dyn Store>> = nodes
        .iter()
        .map(|n| {
            let store: Arc<dyn Store> = Arc::new(MemoryStore {
                data: Mutex::new(BTreeMap::new()),
            });
            (n.id, store)
        })
        .collect();

    let key = Key::from("hello");
    stores[&NodeId(1)].put(&key, StoreValue::Value(b"world".to_vec())).unwrap();
    // node-2 deliberately has no value for `key`, so its get() misses.
    stores[&NodeId(3)].put(&key, StoreValue::Value(b"world".to_vec())).unwrap();

    let failure_detector = Arc::new(FailureDetector::new(Duration::from_secs(30)));
    let request_key = key.clone();
    let action = Rc::new(PerformSerialRequests::new(
        "Get",
        2,
        3,
        Event::new("complete"),
        None,
        stores,
        move |_node: &Node, store: &dyn Store| store.get(&request_key),
        Arc::clone(&failure_detector),
    ));

    let data = PipelineData::new(nodes, key);
    let mut pipeline = Pipeline::new("demo-get", data);
    pipeline.register(Event::new("perform-serial-get"), action);
    pipeline.run(Event::new("perform-serial-get"));

    let data = pipeline.into_data();
    match data.fatal_error {
        Some(PipelineError::InsufficientOperationalNodes(e)) => {
            tracing::error!(message = %e.message, "quorum not met");
        }
        Some(PipelineError::Application(e)) => {
            tracing::error!(%e, "application fault short-circuited the pipeline");
        }
        None => {
            tracing::info!(
                successes = data.successes,
                results = data.interim_results.len(),
                "quorum reached"
            );
        }
    }
}
