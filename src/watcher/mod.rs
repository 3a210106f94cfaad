//! Watches over cluster resources
//!
//! A watch is a background task consuming a kube-runtime watcher stream,
//! converting each object and dispatching add/modify/delete to the
//! operator. It is closed through the [`AbstractWatcher`] capability.

mod tracker;

pub use tracker::EventTracker;

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::{
    api::ListParams,
    runtime::{watcher, WatchStreamExt},
    Api, Resource,
};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::entity::EntityInfo;
use crate::error::{Error, Result};
use crate::kinds::{ConvertFn, PredicateFn};
use crate::operator::Dispatcher;

/// An active subscription to resource events
pub trait AbstractWatcher: Send + Sync {
    /// Stop delivering events
    fn close(&self);

    /// Flag the watch as running during a full reconciliation
    fn set_full_reconciliation_run(&self, run: bool);

    fn is_full_reconciliation_run(&self) -> bool;
}

/// Handle to a running watch task
pub struct WatchHandle {
    operator_name: String,
    token: CancellationToken,
    full_reconciliation_run: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn operator_name(&self) -> &str {
        &self.operator_name
    }

    /// False once the watch task exited
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl AbstractWatcher for WatchHandle {
    fn close(&self) {
        self.token.cancel();
    }

    fn set_full_reconciliation_run(&self, run: bool) {
        self.full_reconciliation_run.store(run, Ordering::SeqCst);
    }

    fn is_full_reconciliation_run(&self) -> bool {
        self.full_reconciliation_run.load(Ordering::SeqCst)
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Builds and starts a watch over resources of type `K`
pub struct WatcherBuilder<K, T: EntityInfo> {
    api: Api<K>,
    config: watcher::Config,
    convert: Option<ConvertFn<K, T>>,
    predicate: Option<PredicateFn<K>>,
    dispatcher: Option<Arc<Dispatcher<T>>>,
}

impl<K, T> WatcherBuilder<K, T>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    T: EntityInfo,
{
    pub fn new(api: Api<K>) -> Self {
        Self {
            api,
            config: watcher::Config::default(),
            convert: None,
            predicate: None,
            dispatcher: None,
        }
    }

    /// Restrict the watch to a label selector
    pub fn with_labels(mut self, selector: &str) -> Self {
        self.config = self.config.labels(selector);
        self
    }

    pub fn with_convert(mut self, convert: ConvertFn<K, T>) -> Self {
        self.convert = Some(convert);
        self
    }

    pub fn with_predicate(mut self, predicate: PredicateFn<K>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher<T>>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Probe the API, then spawn the watch task.
    ///
    /// The probe lists at most one object so that a missing resource type or
    /// missing permissions surface here instead of as endless retries.
    pub async fn watch(self) -> Result<WatchHandle> {
        let convert = self
            .convert
            .ok_or_else(|| Error::config("watch requires a convert function"))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| Error::config("watch requires a dispatcher"))?;
        let predicate = self
            .predicate
            .unwrap_or_else(|| Arc::new(|_: &K| true));

        let mut probe = ListParams::default().limit(1);
        if let Some(labels) = &self.config.label_selector {
            probe = probe.labels(labels);
        }
        self.api.list(&probe).await?;

        let operator_name = dispatcher.operator_name().to_string();
        let token = CancellationToken::new();
        let full_reconciliation_run = Arc::new(AtomicBool::new(false));
        let tracker = EventTracker::new(convert, predicate, full_reconciliation_run.clone());
        let stream = watcher(self.api, self.config).default_backoff();

        let task = tokio::spawn(run_watch(stream, tracker, dispatcher, token.clone()));

        Ok(WatchHandle {
            operator_name,
            token,
            full_reconciliation_run,
            task,
        })
    }
}

/// Consume watch events until the stream ends or the token is cancelled
async fn run_watch<K, T, S>(
    stream: S,
    mut tracker: EventTracker<K, T>,
    dispatcher: Arc<Dispatcher<T>>,
    token: CancellationToken,
) where
    K: Resource + Send + Sync + 'static,
    T: EntityInfo,
    S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send,
{
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(
                    operator = %dispatcher.operator_name(),
                    namespace = %dispatcher.namespace(),
                    "Watch closed"
                );
                break;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => tracker.handle(event, &dispatcher).await,
                Some(Err(e)) => {
                    warn!(
                        operator = %dispatcher.operator_name(),
                        namespace = %dispatcher.namespace(),
                        error = %e,
                        "Watch error, retrying with backoff"
                    );
                }
                None => {
                    warn!(
                        operator = %dispatcher.operator_name(),
                        namespace = %dispatcher.namespace(),
                        "Watch stream ended"
                    );
                    break;
                }
            }
        }
    }
}
