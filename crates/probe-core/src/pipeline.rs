//! Ordered, bidirectional stage pipeline.
//!
//! A [`Pipeline`] is an explicit list of [`Stage`]s. Inbound events are
//! handed to the first stage registered and flow towards the last; outbound
//! messages enter at the last stage and flow towards the first, which sits
//! next to the transport. A stage may swallow, transform, or fan out what
//! it receives by pushing zero or more items into `out`.

use bytes::Bytes;
use tracing::debug;

use crate::errors::PipelineError;
use crate::http::{HttpObject, HttpRequest};

/// Payload carried through the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Raw transport bytes.
    Bytes(Bytes),
    /// Structured outbound request.
    Request(HttpRequest),
    /// Structured inbound response piece.
    Response(HttpObject),
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
        }
    }
}

impl From<HttpRequest> for Message {
    fn from(request: HttpRequest) -> Self {
        Self::Request(request)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

/// Inbound event delivered to stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The connection is established.
    Active,
    /// Data arrived.
    Read(Message),
    /// The peer closed the connection.
    Inactive,
    /// An earlier stage failed; carries the failure description.
    Error(String),
}

impl Event {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Read(_) => "read",
            Self::Inactive => "inactive",
            Self::Error(_) => "error",
        }
    }
}

/// One processing step of the pipeline.
///
/// Both handlers forward their input unchanged by default.
pub trait Stage: Send {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Handle an inbound event, pushing whatever continues downstream into `out`.
    fn inbound(&mut self, event: Event, out: &mut Vec<Event>) -> Result<(), PipelineError> {
        out.push(event);
        Ok(())
    }

    /// Handle an outbound message, pushing whatever continues towards the
    /// transport into `out`.
    fn outbound(&mut self, message: Message, out: &mut Vec<Message>) -> Result<(), PipelineError> {
        out.push(message);
        Ok(())
    }
}

/// Ordered list of stages between the transport and the application.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.names())
            .finish()
    }
}

impl Pipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage after every stage registered so far.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage + 'static) -> Self {
        self.add_last(stage);
        self
    }

    /// Append a stage after every stage registered so far.
    pub fn add_last(&mut self, stage: impl Stage + 'static) {
        self.stages.push(Box::new(stage));
    }

    /// Stage names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of registered stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stage is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run an inbound event through every stage in registration order.
    ///
    /// When a stage fails, whatever it emitted before failing continues
    /// downstream followed by an [`Event::Error`], and the failure is
    /// returned to the caller.
    pub fn fire_inbound(&mut self, event: Event) -> Result<(), PipelineError> {
        self.dispatch_inbound(0, vec![event])
    }

    fn dispatch_inbound(&mut self, start: usize, mut events: Vec<Event>) -> Result<(), PipelineError> {
        for idx in start..self.stages.len() {
            let mut next = Vec::new();
            for event in events {
                if let Err(err) = self.stages[idx].inbound(event, &mut next) {
                    debug!(stage = self.stages[idx].name(), error = %err, "inbound stage failed");
                    next.push(Event::Error(err.to_string()));
                    // Downstream failures while reporting this one are not interesting.
                    let _ = self.dispatch_inbound(idx + 1, next);
                    return Err(err);
                }
            }
            if next.is_empty() {
                return Ok(());
            }
            events = next;
        }
        for event in events {
            debug!(kind = event.kind(), "inbound event reached the end of the pipeline");
        }
        Ok(())
    }

    /// Run an outbound message through every stage in reverse registration
    /// order and return the bytes to write to the transport.
    pub fn write(&mut self, message: Message) -> Result<Vec<Bytes>, PipelineError> {
        let mut messages = vec![message];
        for stage in self.stages.iter_mut().rev() {
            let mut next = Vec::new();
            for message in messages {
                stage.outbound(message, &mut next)?;
            }
            messages = next;
        }
        messages
            .into_iter()
            .map(|message| match message {
                Message::Bytes(bytes) => Ok(bytes),
                other => Err(PipelineError::Unencoded(other.kind())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;

    use super::*;

    /// Records every inbound event it sees, then forwards it.
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Stage for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn inbound(&mut self, event: Event, out: &mut Vec<Event>) -> Result<(), PipelineError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.kind()));
            out.push(event);
            Ok(())
        }

        fn outbound(&mut self, message: Message, out: &mut Vec<Message>) -> Result<(), PipelineError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:out:{}", self.name, message.kind()));
            out.push(message);
            Ok(())
        }
    }

    /// Turns requests into their target bytes.
    struct Encoder;

    impl Stage for Encoder {
        fn name(&self) -> &'static str {
            "encoder"
        }

        fn outbound(&mut self, message: Message, out: &mut Vec<Message>) -> Result<(), PipelineError> {
            match message {
                Message::Request(req) => out.push(Message::Bytes(Bytes::from(req.target))),
                other => out.push(other),
            }
            Ok(())
        }
    }

    /// Fails on every read.
    struct Failing;

    impl Stage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn inbound(&mut self, event: Event, out: &mut Vec<Event>) -> Result<(), PipelineError> {
            match event {
                Event::Read(_) => Err(PipelineError::Stage {
                    stage: "failing",
                    message: "boom".into(),
                }),
                other => {
                    out.push(other);
                    Ok(())
                }
            }
        }
    }

    fn recorder(name: &'static str, seen: &Arc<Mutex<Vec<String>>>) -> Recorder {
        Recorder {
            name,
            seen: Arc::clone(seen),
        }
    }

    #[test]
    fn inbound_runs_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new()
            .with_stage(recorder("a", &seen))
            .with_stage(recorder("b", &seen));
        pipeline.fire_inbound(Event::Active).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a:active", "b:active"]);
    }

    #[test]
    fn outbound_runs_in_reverse_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new()
            .with_stage(recorder("a", &seen))
            .with_stage(Encoder)
            .with_stage(recorder("b", &seen));
        let bytes = pipeline
            .write(Message::Request(HttpRequest::get("/x", "h")))
            .unwrap();
        assert_eq!(bytes, vec![Bytes::from_static(b"/x")]);
        assert_eq!(*seen.lock().unwrap(), vec!["b:out:request", "a:out:bytes"]);
    }

    #[test]
    fn unencoded_message_is_rejected() {
        let mut pipeline = Pipeline::new();
        let err = pipeline
            .write(Message::Request(HttpRequest::get("/", "h")))
            .unwrap_err();
        assert_matches!(err, PipelineError::Unencoded("request"));
    }

    #[test]
    fn failure_is_reported_downstream_and_returned() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new()
            .with_stage(Failing)
            .with_stage(recorder("tail", &seen));
        let err = pipeline
            .fire_inbound(Event::Read(Message::Bytes(Bytes::from_static(b"x"))))
            .unwrap_err();
        assert_matches!(err, PipelineError::Stage { stage: "failing", .. });
        assert_eq!(*seen.lock().unwrap(), vec!["tail:error"]);
    }

    #[test]
    fn names_follow_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .with_stage(recorder("first", &seen))
            .with_stage(Encoder);
        assert_eq!(pipeline.names(), vec!["first", "encoder"]);
        assert_eq!(pipeline.len(), 2);
        assert!(Pipeline::new().is_empty());
    }
}
