use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use submerge_base::NodeId;
use submerge_net::FailureDetector;

use crate::pipeline::{
    Action, Event, InsufficientOperationalNodesError, Pipeline, PipelineError, RequestCompletedCallback,
};
use crate::store::{Store, StoreError, StoreValue};

/// The sole point of operation-specificity: encodes which store
/// operation (a get, a getAll, a put, ...) a single node attempt should
/// perform.
pub trait StoreRequest {
    fn request(&self, node: &submerge_base::Node, store: &dyn Store) -> Result<StoreValue, StoreError>;
}

impl<F> StoreRequest for F
where
    F: Fn(&submerge_base::Node, &dyn Store) -> Result<StoreValue, StoreError>,
{
    fn request(&self, node: &submerge_base::Node, store: &dyn Store) -> Result<StoreValue, StoreError> {
        self(node, store)
    }
}

/// Makes up for a shortfall in a preceding parallel stage by issuing
/// blocking per-node requests, in order, until `preferred` successes are
/// reached or candidates are exhausted, then steers the pipeline based
/// on whether `required` was reached.
pub struct PerformSerialRequests {
    operation_name: String,
    required: usize,
    preferred: usize,
    complete_event: Event,
    insufficient_successes_event: Option<Event>,
    stores: HashMap<NodeId, Arc<dyn Store>>,
    store_request: Box<dyn StoreRequest>,
    failure_detector: Arc<FailureDetector>,
}

impl PerformSerialRequests {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation_name: impl Into<String>,
        required: usize,
        preferred: usize,
        complete_event: Event,
        insufficient_successes_event: Option<Event>,
        stores: HashMap<NodeId, Arc<dyn Store>>,
        store_request: impl StoreRequest + 'static,
        failure_detector: Arc<FailureDetector>,
    ) -> Self {
        assert!(required <= preferred, "required ({required}) must be <= preferred ({preferred})");
        PerformSerialRequests {
            operation_name: operation_name.into(),
            required,
            preferred,
            complete_event,
            insufficient_successes_event,
            stores,
            store_request: Box::new(store_request),
            failure_detector,
        }
    }
}

impl Action for PerformSerialRequests {
    fn execute(&self, pipeline: &mut Pipeline) {
        loop {
            let (node, node_index) = {
                let data = pipeline.data();
                if !(data.successes < self.preferred && data.node_index < data.nodes.len()) {
                    break;
                }
                (data.nodes[data.node_index].clone(), data.node_index)
            };

            let start = Instant::now();
            let store = self.stores.get(&node.id).cloned();
            let result = match &store {
                Some(store) => self.store_request.request(&node, store.as_ref()),
                // A missing store handle is a caller/wiring bug, not a
                // transport failure: the node was never actually
                // contacted, so it must not feed the FailureDetector.
                None => Err(StoreError::Other(format!(
                    "no store handle registered for node {}",
                    node.id.0
                ))),
            };
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(value) => {
                    self.failure_detector.record_success(node.id, elapsed_ms);
                    let data = pipeline.data_mut();
                    data.successes += 1;
                    let key = data.key.clone();
                    data.interim_results.push(RequestCompletedCallback {
                        node,
                        key,
                        request_time_ms: elapsed_ms,
                        result: value,
                    });
                    data.node_index = node_index + 1;
                }
                Err(err @ StoreError::Unreachable(_)) => {
                    self.failure_detector.record_exception(node.id, elapsed_ms, &err);
                    let data = pipeline.data_mut();
                    data.failures.push(err);
                    data.node_index = node_index + 1;
                }
                Err(err @ StoreError::Application(_)) => {
                    pipeline.data_mut().fatal_error = Some(PipelineError::Application(err));
                    // nodeIndex is deliberately not advanced: the error
                    // is authoritative, and a re-entrant recovery stage
                    // would retry this same node.
                    pipeline.add_event(Event::ERROR);
                    return;
                }
                Err(err @ StoreError::Other(_)) => {
                    tracing::warn!(
                        operation = %self.operation_name,
                        node = node.id.0,
                        error = %err,
                        "store request failed with an unclassified error"
                    );
                    let data = pipeline.data_mut();
                    data.failures.push(err);
                    data.node_index = node_index + 1;
                }
            }
        }

        let (successes, failures) = {
            let data = pipeline.data();
            (data.successes, data.failures.clone())
        };

        if successes >= self.required {
            pipeline.add_event(self.complete_event.clone());
        } else if let Some(event) = self.insufficient_successes_event.clone() {
            pipeline.add_event(event);
        } else {
            let message = format!(
                "{} {}s required, but {} succeeded",
                self.required, self.operation_name, successes
            );
            pipeline.data_mut().fatal_error = Some(PipelineError::InsufficientOperationalNodes(
                InsufficientOperationalNodesError { message, failures },
            ));
            pipeline.add_event(Event::ERROR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineData;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};
    use submerge_base::{Key, Node, ProtocolCode};
    use test_log::test;

    struct NullStore;
    impl Store for NullStore {
        fn get(&self, _key: &Key) -> Result<StoreValue, StoreError> {
            unreachable!("test closures never call through to the store")
        }
        fn get_all(&self, _keys: &[Key]) -> Result<BTreeMap<Key, StoreValue>, StoreError> {
            unreachable!()
        }
        fn put(&self, _key: &Key, _value: StoreValue) -> Result<(), StoreError> {
            unreachable!()
        }
        fn delete(&self, _key: &Key) -> Result<bool, StoreError> {
            unreachable!()
        }
    }

    fn node(id: u16) -> Node {
        Node::new(NodeId(id), format!("node-{id}"), 6666, ProtocolCode::new("vp1"))
    }

    fn stores_for(nodes: &[Node]) -> HashMap<NodeId, Arc<dyn Store>> {
        nodes.iter().map(|n| (n.id, Arc::new(NullStore) as Arc<dyn Store>)).collect()
    }

    /// Builds a StoreRequest that returns a scripted outcome per node,
    /// in the order the node is attempted, panicking if a node is
    /// attempted more times than scripted or not at all.
    fn scripted(outcomes: Vec<(NodeId, Result<StoreValue, StoreError>)>) -> impl StoreRequest {
        let mut by_node: HashMap<NodeId, VecDeque<Result<StoreValue, StoreError>>> = HashMap::new();
        for (id, outcome) in outcomes {
            by_node.entry(id).or_default().push_back(outcome);
        }
        let cell = RefCell::new(by_node);
        move |n: &Node, _s: &dyn Store| {
            cell.borrow_mut()
                .get_mut(&n.id)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| panic!("no scripted outcome left for node {}", n.id.0))
        }
    }

    fn value(s: &str) -> StoreValue {
        StoreValue::Value(s.as_bytes().to_vec())
    }

    fn run_action(action: PerformSerialRequests, data: PipelineData) -> PipelineData {
        let mut pipeline = Pipeline::new("test-op", data);
        action.execute(&mut pipeline);
        pipeline.into_data()
    }

    #[test]
    fn quorum_met_on_first_attempt() {
        let nodes = vec![node(1), node(2), node(3)];
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Get",
            2,
            2,
            Event::new("complete"),
            None,
            stores_for(&nodes),
            scripted(vec![
                (NodeId(1), Ok(value("a"))),
                (NodeId(2), Ok(value("b"))),
            ]),
            Arc::clone(&fd),
        );
        let data = PipelineData::new(nodes, Key::from("k"));
        let mut pipeline = Pipeline::new("test-op", data);
        action.execute(&mut pipeline);

        assert_eq!(pipeline.data().successes, 2);
        assert_eq!(pipeline.data().node_index, 2);
        assert_eq!(pipeline.data().interim_results.len(), 2);
        assert!(pipeline.data().fatal_error.is_none());
        assert!(pipeline.data().failures.is_empty());
    }

    // Entering with successes=1, node_index=2, N3 throws Unreachable, N4
    // and N5 succeed.
    #[test]
    fn shortfall_made_up_serially() {
        let nodes = vec![node(1), node(2), node(3), node(4), node(5)];
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Get",
            2,
            3,
            Event::new("complete"),
            None,
            stores_for(&nodes),
            scripted(vec![
                (NodeId(3), Err(StoreError::Unreachable("timeout".into()))),
                (NodeId(4), Ok(value("d"))),
                (NodeId(5), Ok(value("e"))),
            ]),
            Arc::clone(&fd),
        );

        let mut data = PipelineData::new(nodes, Key::from("k"));
        data.successes = 1;
        data.node_index = 2;

        let mut pipeline = Pipeline::new("test-op", data);
        action.execute(&mut pipeline);

        assert_eq!(pipeline.data().successes, 3);
        assert_eq!(pipeline.data().node_index, 5);
        assert_eq!(pipeline.data().failures.len(), 1);
        assert_eq!(fd.successes(NodeId(4)) + fd.successes(NodeId(5)), 2);
        assert_eq!(fd.failures(NodeId(3)), 1);
    }

    // Insufficient operational nodes, no fallback event configured.
    #[test]
    fn insufficient_operational_nodes_without_fallback() {
        let nodes = vec![node(1), node(2)];
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Get",
            2,
            2,
            Event::new("complete"),
            None,
            stores_for(&nodes),
            scripted(vec![
                (NodeId(1), Err(StoreError::Unreachable("down".into()))),
                (NodeId(2), Err(StoreError::Unreachable("down".into()))),
            ]),
            fd,
        );

        let data = run_action(action, PipelineData::new(nodes, Key::from("k")));

        assert_eq!(data.failures.len(), 2);
        match data.fatal_error {
            Some(PipelineError::InsufficientOperationalNodes(e)) => {
                assert_eq!(e.message, "2 Gets required, but 0 succeeded");
                assert_eq!(e.failures.len(), 2);
            }
            other => panic!("expected InsufficientOperationalNodes, got {other:?}"),
        }
    }

    // An application error short-circuits; N3 is never contacted and
    // node_index still points at N2 (not advanced).
    #[test]
    fn application_error_short_circuits() {
        let nodes = vec![node(1), node(2), node(3)];
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Put",
            2,
            3,
            Event::new("complete"),
            None,
            stores_for(&nodes),
            scripted(vec![
                (NodeId(1), Ok(StoreValue::Unit)),
                (NodeId(2), Err(StoreError::Application("obsolete version".into()))),
            ]),
            fd,
        );

        let data = run_action(action, PipelineData::new(nodes, Key::from("k")));

        assert_eq!(data.successes, 1);
        assert_eq!(data.node_index, 1, "node_index must still point at N2, the node that short-circuited");
        match data.fatal_error {
            Some(PipelineError::Application(StoreError::Application(msg))) => {
                assert_eq!(msg, "obsolete version");
            }
            other => panic!("expected Application fatal error, got {other:?}"),
        }
    }

    #[test]
    fn empty_nodes_skips_loop_and_fails_without_fallback() {
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Get",
            1,
            1,
            Event::new("complete"),
            None,
            HashMap::new(),
            scripted(vec![]),
            fd,
        );
        let data = run_action(action, PipelineData::new(vec![], Key::from("k")));
        assert!(matches!(data.fatal_error, Some(PipelineError::InsufficientOperationalNodes(_))));
    }

    #[test]
    fn preferred_zero_never_runs_loop_body_but_still_completes_if_required_met() {
        let nodes = vec![node(1)];
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Get",
            0,
            0,
            Event::new("complete"),
            None,
            stores_for(&nodes),
            scripted(vec![]),
            fd,
        );
        let mut pipeline = Pipeline::new("test-op", PipelineData::new(nodes, Key::from("k")));
        action.execute(&mut pipeline);
        assert_eq!(pipeline.data().node_index, 0, "loop body must never run when preferred == 0");
        assert_eq!(pipeline.pending_events(), vec![Event::new("complete")]);
    }

    #[test]
    fn insufficient_successes_event_is_used_when_configured() {
        let nodes = vec![node(1)];
        let fd = Arc::new(FailureDetector::new(std::time::Duration::from_secs(30)));
        let action = PerformSerialRequests::new(
            "Get",
            1,
            1,
            Event::new("complete"),
            Some(Event::new("fallback")),
            stores_for(&nodes),
            scripted(vec![(NodeId(1), Err(StoreError::Unreachable("down".into())))]),
            fd,
        );
        let mut pipeline = Pipeline::new("test-op", PipelineData::new(nodes, Key::from("k")));
        action.execute(&mut pipeline);
        assert!(pipeline.data().fatal_error.is_none(), "a configured fallback event must not set a fatal error");
        assert_eq!(pipeline.pending_events(), vec![Event::new("fallback")]);
    }
}
