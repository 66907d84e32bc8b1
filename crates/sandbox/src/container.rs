//! Isolation container.
//!
//! Owns at most one live boundary and correlates execute requests with the
//! boundary's replies. All boundaries ever launched by a container post into
//! one host inbox; a dispatcher task routes messages from the live boundary
//! and drops everything else.
//!
//! Concurrency policy is cancel-and-replace: starting an execution while
//! another is pending fails the older one with [`Error::Superseded`] and
//! moves the new one onto a fresh boundary, so it never queues behind a
//! runaway script. A timed-out execution also retires its boundary.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use codementor_core::config::SandboxSettings;
use codementor_core::{ConsoleEvent, Error, ExecutionRequest, Result};

use crate::boundary::{BoundaryHandle, BoundaryLauncher};
use crate::policy::ContentPolicy;
use crate::protocol::{BoundaryId, Envelope, Message, Postbox, Posted, RequestId};

/// Container tuning.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Host-side deadline for one execution.
    pub execution_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&SandboxSettings> for ContainerConfig {
    fn from(settings: &SandboxSettings) -> Self {
        Self {
            execution_timeout: Duration::from_millis(settings.execution_timeout_ms),
        }
    }
}

/// Lifecycle of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Uninitialized,
    Created,
    Executing,
    Destroyed,
}

type Settle = oneshot::Sender<Result<()>>;

struct Inner {
    state: ContainerState,
    boundary: Option<BoundaryHandle>,
    pending: HashMap<RequestId, Settle>,
    subscribers: Vec<mpsc::UnboundedSender<ConsoleEvent>>,
    rendered: Option<String>,
    next_request: RequestId,
}

impl Inner {
    fn live(&self) -> Option<BoundaryId> {
        self.boundary.as_ref().map(BoundaryHandle::id)
    }

    fn fail_pending(&mut self, error: impl Fn() -> Error) {
        for (id, settle) in self.pending.drain() {
            tracing::debug!(request = id, error = %error(), "Failing pending execution");
            let _ = settle.send(Err(error()));
        }
    }

    fn settle(&mut self, id: RequestId, outcome: Result<()>) {
        match self.pending.remove(&id) {
            Some(settle) => {
                let _ = settle.send(outcome);
            }
            None => tracing::debug!(request = id, "Reply for a settled request ignored"),
        }
        if self.pending.is_empty() && self.state == ContainerState::Executing {
            self.state = ContainerState::Created;
        }
    }

    /// Route one posted message. Anything not from the live boundary is
    /// dropped unseen.
    fn dispatch(&mut self, posted: Posted) {
        if self.live() != Some(posted.source) {
            tracing::trace!(
                source = %posted.source,
                kind = posted.envelope.message.kind(),
                "Dropping message from a boundary that is not live"
            );
            return;
        }

        let id = posted.envelope.id;
        match posted.envelope.message {
            Message::Console(payload) => {
                let event = ConsoleEvent::from(payload);
                self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            }
            Message::Result(payload) => {
                self.rendered = Some(payload.document);
                self.settle(id, Ok(()));
            }
            Message::Error(mut payload) => {
                if let Some(document) = payload.document.take() {
                    self.rendered = Some(document);
                }
                tracing::debug!(request = id, message = %payload.message, "Execution failed in boundary");
                self.settle(id, Err(payload.into_error()));
            }
            Message::Execute(_) => {
                tracing::warn!(source = %posted.source, "Boundary sent an execute message");
            }
        }
    }
}

/// Host side of the isolation boundary.
pub struct SandboxContainer {
    launcher: Arc<dyn BoundaryLauncher>,
    policy: ContentPolicy,
    config: ContainerConfig,
    inner: Arc<Mutex<Inner>>,
    host_tx: mpsc::UnboundedSender<Posted>,
    host_rx: Mutex<Option<mpsc::UnboundedReceiver<Posted>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SandboxContainer {
    pub fn new(launcher: Arc<dyn BoundaryLauncher>, config: ContainerConfig) -> Self {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            policy: ContentPolicy::default(),
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: ContainerState::Uninitialized,
                boundary: None,
                pending: HashMap::new(),
                subscribers: Vec::new(),
                rendered: None,
                next_request: 1,
            })),
            host_tx,
            host_rx: Mutex::new(Some(host_rx)),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn with_policy(mut self, policy: ContentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ContentPolicy {
        &self.policy
    }

    pub fn state(&self) -> ContainerState {
        self.inner.lock().state
    }

    /// Id of the live boundary, if any.
    pub fn boundary_id(&self) -> Option<BoundaryId> {
        self.inner.lock().live()
    }

    /// Last document reported by a boundary.
    pub fn rendered(&self) -> Option<String> {
        self.inner.lock().rendered.clone()
    }

    /// Tear down any existing boundary and launch a fresh one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(&self) -> Result<()> {
        self.destroy();
        self.ensure_dispatcher()?;

        let mut inner = self.inner.lock();
        self.relaunch(&mut inner)?;
        inner.state = ContainerState::Created;
        inner.rendered = None;
        tracing::info!(boundary = ?inner.live(), "Sandbox container created");
        Ok(())
    }

    /// Receive every console event forwarded from now until destroy.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConsoleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.push(tx);
        rx
    }

    /// Run one request and wait for its terminal message.
    pub async fn execute(&self, html: &str, css: &str, js: &str) -> Result<()> {
        let request = ExecutionRequest::new(html, css, js);
        let (id, settled) = self.begin(request)?;

        match tokio::time::timeout(self.config.execution_timeout, settled).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Aborted),
            Err(_) => {
                let mut inner = self.inner.lock();
                if inner.pending.remove(&id).is_some() {
                    tracing::warn!(
                        request = id,
                        timeout_ms = self.config.execution_timeout.as_millis() as u64,
                        "Execution timed out; retiring boundary"
                    );
                    if inner.pending.is_empty() && inner.state == ContainerState::Executing {
                        inner.state = ContainerState::Created;
                    }
                    if let Err(e) = self.relaunch(&mut inner) {
                        tracing::error!(error = %e, "Failed to replace timed-out boundary");
                    }
                }
                Err(Error::ExecutionTimeout(self.config.execution_timeout))
            }
        }
    }

    fn begin(&self, request: ExecutionRequest) -> Result<(RequestId, oneshot::Receiver<Result<()>>)> {
        let mut inner = self.inner.lock();
        match inner.state {
            ContainerState::Created | ContainerState::Executing => {}
            ContainerState::Uninitialized | ContainerState::Destroyed => {
                return Err(Error::ContainerNotReady)
            }
        }

        if !inner.pending.is_empty() {
            inner.fail_pending(|| Error::Superseded);
            self.relaunch(&mut inner)?;
        }

        let id = inner.next_request;
        inner.next_request += 1;
        inner.rendered = None;

        let boundary = inner.boundary.as_ref().ok_or(Error::ContainerNotReady)?;
        boundary.send(Envelope::execute(id, request))?;

        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        inner.state = ContainerState::Executing;
        tracing::debug!(request = id, boundary = ?inner.live(), "Execution dispatched");
        Ok((id, rx))
    }

    /// Detach the boundary, drop all subscribers and fail every pending
    /// execution with [`Error::Aborted`]. Safe to call repeatedly.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock();
        inner.fail_pending(|| Error::Aborted);
        inner.subscribers.clear();
        if let Some(boundary) = inner.boundary.take() {
            tracing::info!(boundary = %boundary.id(), "Sandbox boundary destroyed");
        }
        if inner.state != ContainerState::Uninitialized {
            inner.state = ContainerState::Destroyed;
        }
    }

    fn relaunch(&self, inner: &mut Inner) -> Result<()> {
        inner.boundary = None;
        let postbox = Postbox::new(BoundaryId::new(), self.host_tx.clone());
        match self.launcher.launch(postbox, &self.policy) {
            Ok(handle) => {
                inner.boundary = Some(handle);
                Ok(())
            }
            Err(e) => {
                inner.state = ContainerState::Uninitialized;
                Err(e)
            }
        }
    }

    fn ensure_dispatcher(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::internal("sandbox container requires a tokio runtime"))?;
        let mut rx = self
            .host_rx
            .lock()
            .take()
            .ok_or_else(|| Error::internal("host inbox already taken"))?;
        let inner = self.inner.clone();

        *dispatcher = Some(runtime.spawn(async move {
            while let Some(posted) = rx.recv().await {
                inner.lock().dispatch(posted);
            }
        }));
        Ok(())
    }
}

impl Drop for SandboxContainer {
    fn drop(&mut self) {
        self.destroy();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{MockBehavior, MockBoundary};
    use codementor_core::ConsoleLevel;

    fn container(mock: MockBoundary) -> (SandboxContainer, Arc<MockBoundary>) {
        let mock = Arc::new(mock);
        let container = SandboxContainer::new(mock.clone(), ContainerConfig::default());
        (container, mock)
    }

    #[tokio::test]
    async fn test_execute_before_create_is_rejected() {
        let (container, _) = container(MockBoundary::default());
        assert_eq!(container.state(), ContainerState::Uninitialized);
        let err = container.execute("", "", "").await.unwrap_err();
        assert!(matches!(err, Error::ContainerNotReady));
    }

    #[tokio::test]
    async fn test_execute_resolves_and_emits_console() {
        let (container, _) = container(MockBoundary::default().with_console(ConsoleLevel::Log, &["x"]));
        container.create().unwrap();
        let mut events = container.subscribe();

        container.execute("<h1>Hi</h1>", "", "console.log('x')").await.unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.level, ConsoleLevel::Log);
        assert_eq!(event.parts, vec!["x"]);
        assert!(events.try_recv().is_err());
        assert_eq!(container.state(), ContainerState::Created);
        assert!(container.rendered().unwrap().contains("<h1>Hi</h1>"));
    }

    #[tokio::test]
    async fn test_runtime_error_rejects_with_message() {
        let (container, _) = container(MockBoundary::new(MockBehavior::Fail("boom".into())));
        container.create().unwrap();

        let err = container.execute("", "", "throw new Error('boom')").await.unwrap_err();
        assert!(matches!(err, Error::Runtime { ref message, .. } if message == "boom"));
        assert!(container.rendered().unwrap().contains("error-message"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending_handler() {
        let (container, mock) = container(MockBoundary::new(MockBehavior::Silent));
        container.create().unwrap();
        let first_postbox = mock.postbox(0).unwrap();

        let err = container.execute("", "", "while(true){}").await.unwrap_err();
        assert!(matches!(err, Error::ExecutionTimeout(d) if d == Duration::from_secs(10)));
        assert_eq!(container.state(), ContainerState::Created);
        assert_eq!(mock.launches(), 2, "timed-out boundary is replaced");

        // A late reply from the retired boundary is dropped.
        first_postbox.post(Envelope::result(1, "late".into())).unwrap();
        tokio::task::yield_now().await;
        assert_ne!(container.rendered().as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_report_previous_document() {
        let (container, mock) = container(MockBoundary::new(MockBehavior::Silent));
        let container = Arc::new(container);
        container.create().unwrap();

        let first = {
            let container = container.clone();
            tokio::spawn(async move { container.execute("<p>old</p>", "", "").await })
        };
        tokio::task::yield_now().await;
        mock.postbox(0)
            .unwrap()
            .post(Envelope::result(1, "old document".into()))
            .unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(container.rendered().as_deref(), Some("old document"));

        let err = container.execute("<p>new</p>", "", "while(true){}").await.unwrap_err();
        assert!(matches!(err, Error::ExecutionTimeout(_)));
        assert!(container.rendered().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_execute_supersedes_pending_one() {
        let (container, mock) = container(MockBoundary::new(MockBehavior::Silent));
        let container = Arc::new(container);
        container.create().unwrap();

        let first = {
            let container = container.clone();
            tokio::spawn(async move { container.execute("", "", "first()").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(container.state(), ContainerState::Executing);

        let second = {
            let container = container.clone();
            tokio::spawn(async move { container.execute("", "", "second()").await })
        };

        assert!(matches!(first.await.unwrap(), Err(Error::Superseded)));
        assert_eq!(mock.launches(), 2);

        let live = mock.postbox(1).unwrap();
        live.post(Envelope::result(2, "done".into())).unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(container.rendered().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_destroy_in_flight_aborts_without_stale_delivery() {
        let (container, mock) = container(MockBoundary::new(MockBehavior::Silent));
        let container = Arc::new(container);
        container.create().unwrap();
        let mut events = container.subscribe();

        let pending = {
            let container = container.clone();
            tokio::spawn(async move { container.execute("", "", "slow()").await })
        };
        tokio::task::yield_now().await;

        container.destroy();
        assert!(matches!(pending.await.unwrap(), Err(Error::Aborted)));
        assert_eq!(container.state(), ContainerState::Destroyed);

        let old = mock.postbox(0).unwrap();
        old.post(Envelope::console(1, ConsoleLevel::Log, vec!["stale".into()])).unwrap();
        old.post(Envelope::result(1, "stale".into())).unwrap();
        tokio::task::yield_now().await;

        assert!(events.recv().await.is_none(), "subscribers are dropped on destroy");
        assert!(container.rendered().is_none());

        container.destroy();
        assert_eq!(container.state(), ContainerState::Destroyed);
    }

    #[tokio::test]
    async fn test_spoofed_source_is_ignored() {
        let (container, mock) = container(MockBoundary::new(MockBehavior::Silent));
        let container = Arc::new(container);
        container.create().unwrap();

        let pending = {
            let container = container.clone();
            tokio::spawn(async move { container.execute("", "", "x()").await })
        };
        tokio::task::yield_now().await;

        let live = mock.postbox(0).unwrap();
        let forged = live.spoofed(BoundaryId::new());
        forged.post(Envelope::error(1, crate::protocol::ErrorPayload::message("forged"))).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(container.state(), ContainerState::Executing);

        live.post(Envelope::result(1, "real".into())).unwrap();
        pending.await.unwrap().unwrap();
        assert_eq!(container.rendered().as_deref(), Some("real"));
    }

    #[tokio::test]
    async fn test_subscribe_prunes_dropped_receivers() {
        let (container, _) = container(MockBoundary::default());
        container.create().unwrap();

        for _ in 0..5 {
            drop(container.subscribe());
        }
        let _live = container.subscribe();
        assert_eq!(container.inner.lock().subscribers.len(), 1);
    }

    #[tokio::test]
    async fn test_create_replaces_boundary() {
        let (container, mock) = container(MockBoundary::default());
        container.create().unwrap();
        let first = container.boundary_id().unwrap();
        container.create().unwrap();
        let second = container.boundary_id().unwrap();

        assert_ne!(first, second);
        assert_eq!(mock.launches(), 2);
        container.execute("", "", "").await.unwrap();
    }
}
