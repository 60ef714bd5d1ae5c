use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use istio_smi_store::{gvk_key, ObjectStore, StoreError};
use kube::core::GroupVersionKind;
use tokio::sync::Mutex;
use tracing::warn;

use crate::TranslateError;

/// One-shot registration gate for a single target kind.
///
/// The first caller runs `register_kind` while holding the lock. Callers that
/// queued up behind that attempt take its outcome instead of starting their
/// own, so a failing registration is still tried once per round. Once an
/// attempt succeeds the gate stays open; after a failure the next caller that
/// arrives starts a fresh round.
#[derive(Default)]
pub(crate) struct RegistrationLatch {
    registered: AtomicBool,
    attempts: AtomicU64,
    last_failure: Mutex<Option<Arc<StoreError>>>,
}

impl RegistrationLatch {
    pub(crate) async fn ensure(&self, store: &dyn ObjectStore, gvk: &GroupVersionKind) -> Result<(), TranslateError> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        let seen = self.attempts.load(Ordering::Acquire);
        let mut last_failure = self.last_failure.lock().await;
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        let kind = gvk_key(gvk);
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(source) = last_failure.as_ref() {
                return Err(TranslateError::Registration { kind, source: Arc::clone(source) });
            }
        }

        let res = store.register_kind(gvk).await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        match res {
            Ok(()) => {
                self.registered.store(true, Ordering::Release);
                *last_failure = None;
                Ok(())
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "kind registration failed");
                let source = Arc::new(e);
                *last_failure = Some(Arc::clone(&source));
                Err(TranslateError::Registration { kind, source })
            }
        }
    }
}
