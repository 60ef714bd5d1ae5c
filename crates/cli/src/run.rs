use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Result;
use istio_smi_api::{DispatchError, Dispatcher, SourceEvent, SourceObject};
use istio_smi_core::smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget, UdpRoute};
use istio_smi_kubehub::{start_watcher, Change, KubeStore};
use istio_smi_store::ObjectStore;
use istio_smi_translate::IstioTranslator;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::workers::WorkerPool;

const DEFAULT_QUEUE_CAP: usize = 1024;
const DEFAULT_WORKERS: usize = 4;

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|s| s.parse::<usize>().ok()).filter(|n| *n > 0).unwrap_or(default)
}

fn queue_cap() -> usize {
    env_usize("ISTIO_SMI_QUEUE_CAP", DEFAULT_QUEUE_CAP)
}

fn workers() -> usize {
    env_usize("ISTIO_SMI_WORKERS", DEFAULT_WORKERS)
}

fn spawn_watcher<K>(
    client: Client,
    namespace: Option<String>,
    tx: mpsc::Sender<SourceEvent>,
    lift: fn(K) -> SourceObject,
) -> JoinHandle<()>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + 'static,
{
    tokio::spawn(async move {
        let wrap = move |change: Change<K>| match change {
            Change::Applied(o) => SourceEvent::Upsert(lift(o)),
            Change::Deleted(o) => SourceEvent::Delete(lift(o)),
        };
        if let Err(e) = start_watcher(client, namespace.as_deref(), tx, wrap).await {
            error!(kind = %K::kind(&()), error = ?e, "watcher failed");
        }
    })
}

pub(crate) fn report(event: &SourceEvent, res: &Result<Action, DispatchError>) {
    let obj = event.object();
    match res {
        Ok(_) => debug!(kind = obj.kind().as_str(), target = %obj.object_ref(), "dispatched"),
        Err(e) if e.is_not_implemented() => {
            warn!(kind = obj.kind().as_str(), target = %obj.object_ref(), error = %e, "translation not implemented")
        }
        Err(e) => error!(kind = obj.kind().as_str(), target = %obj.object_ref(), error = %e, "dispatch failed"),
    }
}

pub async fn run(namespace: Option<String>) -> Result<()> {
    let kube_store = KubeStore::try_default().await?;
    let client = kube_store.client();
    let store: Arc<dyn ObjectStore> = Arc::new(kube_store);
    let cap = queue_cap();
    let n_workers = workers();
    let (tx, mut rx) = mpsc::channel::<SourceEvent>(cap);
    info!(ns = ?namespace, queue_cap = cap, workers = n_workers, "starting watchers");

    let watchers = vec![
        spawn_watcher::<TrafficSplit>(client.clone(), namespace.clone(), tx.clone(), SourceObject::TrafficSplit),
        spawn_watcher::<TrafficTarget>(client.clone(), namespace.clone(), tx.clone(), SourceObject::TrafficTarget),
        spawn_watcher::<HttpRouteGroup>(client.clone(), namespace.clone(), tx.clone(), SourceObject::HttpRouteGroup),
        spawn_watcher::<TcpRoute>(client.clone(), namespace.clone(), tx.clone(), SourceObject::TcpRoute),
        spawn_watcher::<UdpRoute>(client, namespace, tx, SourceObject::UdpRoute),
    ];

    let dispatcher = Arc::new(Dispatcher::new(IstioTranslator::new()));
    let cancel = CancellationToken::new();
    let pool = WorkerPool::spawn(n_workers, cap, dispatcher, store, cancel.clone());
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => {
                    if !pool.submit(event).await {
                        error!("dispatch worker stopped unexpectedly");
                        break;
                    }
                }
                None => {
                    warn!("all watchers stopped");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                cancel.cancel();
                break;
            }
        }
    }

    for w in watchers {
        w.abort();
    }
    pool.shutdown().await;
    info!("dispatch workers stopped");
    Ok(())
}
