use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use submerge_base::{Key, Node};

use crate::store::{StoreError, StoreValue};

/// A tag dispatched between Actions. Not a closed enum: an Action mints
/// its own follow-up events (its `completeEvent`, an optional
/// `insufficientSuccessesEvent`) without a central registry predicting
/// every name in advance. `Event::ERROR` is the one reserved sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Event(Cow<'static, str>);

impl Event {
    pub const ERROR: Event = Event(Cow::Borrowed("error"));

    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Event(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produced whenever a per-node request returns without failure.
#[derive(Clone, Debug)]
pub struct RequestCompletedCallback {
    pub node: Node,
    pub key: Key,
    pub request_time_ms: u64,
    pub result: StoreValue,
}

#[derive(Clone, Debug)]
pub struct InsufficientOperationalNodesError {
    pub message: String,
    pub failures: Vec<StoreError>,
}

/// Set on `PipelineData::fatal_error`; once set the pipeline must not
/// also produce a normal completion.
#[derive(Clone, Debug)]
pub enum PipelineError {
    Application(StoreError),
    InsufficientOperationalNodes(InsufficientOperationalNodesError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Application(e) => write!(f, "{e}"),
            PipelineError::InsufficientOperationalNodes(e) => write!(f, "{}", e.message),
        }
    }
}

impl std::error::Error for PipelineError {}

/// The `ListStateData` variant of pipeline state: an ordered candidate
/// list, how far into it the pipeline has progressed, and accumulated
/// results.
///
/// Invariant: `successes + failures.len() <= node_index`.
#[derive(Clone, Debug)]
pub struct PipelineData {
    pub nodes: Vec<Node>,
    pub node_index: usize,
    pub successes: usize,
    pub failures: Vec<StoreError>,
    pub interim_results: Vec<RequestCompletedCallback>,
    pub fatal_error: Option<PipelineError>,
    pub key: Key,
}

impl PipelineData {
    pub fn new(nodes: Vec<Node>, key: Key) -> Self {
        PipelineData {
            nodes,
            node_index: 0,
            successes: 0,
            failures: Vec::new(),
            interim_results: Vec::new(),
            fatal_error: None,
            key,
        }
    }
}

/// A step of the routing state machine: executes synchronously, mutates
/// `PipelineData`, and enqueues the next Event(s) on the Pipeline.
pub trait Action {
    fn execute(&self, pipeline: &mut Pipeline);
}

/// A single-threaded, cooperative event-dispatch state machine. Pops one
/// Event at a time, runs its registered Action to completion, and
/// continues until a terminal Event is dispatched (`Event::ERROR`, or
/// any Event with no registered Action) or the queue drains.
pub struct Pipeline {
    operation: Cow<'static, str>,
    events: VecDeque<Event>,
    actions: HashMap<Event, Rc<dyn Action>>,
    data: PipelineData,
}

impl Pipeline {
    pub fn new(operation: impl Into<Cow<'static, str>>, data: PipelineData) -> Self {
        Pipeline {
            operation: operation.into(),
            events: VecDeque::new(),
            actions: HashMap::new(),
            data,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn register(&mut self, event: Event, action: Rc<dyn Action>) {
        self.actions.insert(event, action);
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn data(&self) -> &PipelineData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut PipelineData {
        &mut self.data
    }

    pub fn into_data(self) -> PipelineData {
        self.data
    }

    #[cfg(test)]
    pub(crate) fn pending_events(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Seeds the queue with `start` and dispatches until terminal.
    pub fn run(&mut self, start: Event) {
        self.add_event(start);
        while let Some(event) = self.events.pop_front() {
            if event == Event::ERROR {
                tracing::debug!(operation = %self.operation, "pipeline reached ERROR");
                break;
            }
            let action = match self.actions.get(&event) {
                Some(a) => Rc::clone(a),
                None => {
                    tracing::debug!(operation = %self.operation, event = %event, "pipeline reached an unregistered (terminal) event");
                    break;
                }
            };
            action.execute(self);
        }
    }
}
