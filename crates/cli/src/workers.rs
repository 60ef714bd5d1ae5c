use std::sync::Arc;

use istio_smi_api::{Dispatcher, SourceEvent};
use istio_smi_store::ObjectStore;
use istio_smi_translate::MeshTranslator;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::run::report;

/// Bucket for a namespace (FNV-1a). Objects without a namespace hash as "".
pub(crate) fn ns_bucket(ns: &str, workers: usize) -> usize {
    if workers <= 1 {
        return 0;
    }
    let mut h: u64 = 0xcbf29ce484222325;
    for b in ns.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h as usize) % workers
}

/// Fixed set of dispatch workers.
///
/// Events are bucketed by namespace and each worker handles its bucket in
/// arrival order. Every write the translator issues is scoped to the source's
/// namespace, so events that can touch the same objects never run out of order.
pub(crate) struct WorkerPool {
    senders: Vec<mpsc::Sender<SourceEvent>>,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub(crate) fn spawn<T>(
        workers: usize,
        queue_cap: usize,
        dispatcher: Arc<Dispatcher<T>>,
        store: Arc<dyn ObjectStore>,
        cancel: CancellationToken,
    ) -> Self
    where
        T: MeshTranslator + 'static,
    {
        let workers = workers.max(1);
        let per_worker = (queue_cap / workers).max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(per_worker);
            senders.push(tx);
            tasks.spawn(work(id, rx, Arc::clone(&dispatcher), Arc::clone(&store), cancel.clone()));
        }
        Self { senders, tasks }
    }

    /// Queue an event on its namespace's worker. Returns false once that worker has stopped.
    pub(crate) async fn submit(&self, event: SourceEvent) -> bool {
        let idx = ns_bucket(event.object().namespace().unwrap_or_default(), self.senders.len());
        self.senders[idx].send(event).await.is_ok()
    }

    /// Close the queues and wait for every worker to exit. Without cancellation
    /// the workers first drain what is already queued.
    pub(crate) async fn shutdown(self) {
        let Self { senders, mut tasks } = self;
        drop(senders);
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "dispatch worker panicked");
            }
        }
    }
}

async fn work<T: MeshTranslator>(
    id: usize,
    mut rx: mpsc::Receiver<SourceEvent>,
    dispatcher: Arc<Dispatcher<T>>,
    store: Arc<dyn ObjectStore>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };
        let res = dispatcher.dispatch(&event, store.as_ref(), &cancel).await;
        report(&event, &res);
    }
    debug!(worker = id, "dispatch worker stopped");
}
