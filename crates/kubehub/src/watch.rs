use std::fmt::Debug;

use futures::TryStreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::Api,
    runtime::watcher::{self, Event},
    Client, Resource,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A source object observed by a watcher.
#[derive(Debug, Clone)]
pub enum Change<K> {
    Applied(K),
    Deleted(K),
}

/// List+watch a namespaced kind and forward every change through `tx`.
///
/// `wrap` lifts the typed change into the channel's event type so watchers for
/// several kinds can share one channel. Returns when the stream ends or the
/// receiver is dropped.
pub async fn start_watcher<K, E, F>(
    client: Client,
    namespace: Option<&str>,
    tx: mpsc::Sender<E>,
    wrap: F,
) -> anyhow::Result<()>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(Change<K>) -> E,
{
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let kind = K::kind(&());
    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    info!(kind = %kind, ns = ?namespace, "watcher started");
    while let Some(ev) = stream.try_next().await? {
        let changes = match ev {
            Event::Applied(o) => vec![Change::Applied(o)],
            Event::Deleted(o) => vec![Change::Deleted(o)],
            Event::Restarted(list) => {
                debug!(kind = %kind, count = list.len(), "watch restart");
                list.into_iter().map(Change::Applied).collect()
            }
        };
        for change in changes {
            if tx.send(wrap(change)).await.is_err() {
                debug!(kind = %kind, "event receiver closed; stopping watcher");
                return Ok(());
            }
        }
    }
    warn!(kind = %kind, "watcher stream ended");
    Ok(())
}
