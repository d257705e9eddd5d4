// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::Error;
use crate::identity_document::IdentityDocument;

/// Subscriber to rotation lifecycle events. Dispatched off the rotation
/// critical path (SPEC_FULL.md §4.2) so a slow or panicking observer can
/// never stall the next rotation.
pub trait RotationObserver: Send + Sync {
    /// A rotation attempt began.
    fn on_rotation_started(&self, reason: &str) {
        let _ = reason;
    }

    /// A rotation swapped in `new`, replacing `old` (absent only for the
    /// very first credential installation).
    fn on_rotation_completed(&self, old: Option<&Arc<IdentityDocument>>, new: &Arc<IdentityDocument>) {
        let _ = (old, new);
    }

    /// A rotation attempt failed and was aborted; the previous credential
    /// remains in place.
    fn on_rotation_failed(&self, error: &Error) {
        let _ = error;
    }
}

/// Dispatch `observers` on a fresh task per observer, each wrapped in a
/// panic barrier so one misbehaving observer cannot wedge the rotation
/// critical path or take down the others.
pub(crate) fn dispatch_completed(
    observers: &[Arc<dyn RotationObserver>],
    old: Option<Arc<IdentityDocument>>,
    new: Arc<IdentityDocument>,
) {
    for observer in observers.iter().cloned() {
        let old = old.clone();
        let new = Arc::clone(&new);
        tokio::spawn(async move {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                observer.on_rotation_completed(old.as_ref(), &new);
            }));
            if outcome.is_err() {
                tracing::error!("rotation observer panicked in on_rotation_completed");
            }
        });
    }
}

/// Same panic-barrier dispatch for `on_rotation_started`.
pub(crate) fn dispatch_started(observers: &[Arc<dyn RotationObserver>], reason: &'static str) {
    for observer in observers.iter().cloned() {
        tokio::spawn(async move {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_rotation_started(reason)));
            if outcome.is_err() {
                tracing::error!("rotation observer panicked in on_rotation_started");
            }
        });
    }
}

/// Same panic-barrier dispatch for `on_rotation_failed`.
pub(crate) fn dispatch_failed(observers: &[Arc<dyn RotationObserver>], error: Error) {
    for observer in observers.iter().cloned() {
        let error = error.clone();
        tokio::spawn(async move {
            let outcome =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_rotation_failed(&error)));
            if outcome.is_err() {
                tracing::error!("rotation observer panicked in on_rotation_failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    use crate::cert::Certificate;
    use crate::test_support::self_signed_leaf;

    struct CountingObserver {
        completed: AtomicUsize,
    }

    impl RotationObserver for CountingObserver {
        fn on_rotation_completed(&self, _old: Option<&Arc<IdentityDocument>>, _new: &Arc<IdentityDocument>) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingObserver;

    impl RotationObserver for PanickingObserver {
        fn on_rotation_completed(&self, _old: Option<&Arc<IdentityDocument>>, _new: &Arc<IdentityDocument>) {
            panic!("deliberately broken observer");
        }
    }

    fn doc() -> Arc<IdentityDocument> {
        let (leaf, key, _, _) = self_signed_leaf("spiffe://example.org/api");
        let cert = Certificate::new(leaf, key, vec![]).unwrap();
        Arc::new(IdentityDocument::new(cert, SystemTime::UNIX_EPOCH).unwrap())
    }

    #[tokio::test]
    async fn a_panicking_observer_does_not_prevent_others_from_running() {
        let counting = Arc::new(CountingObserver {
            completed: AtomicUsize::new(0),
        });
        let observers: Vec<Arc<dyn RotationObserver>> =
            vec![Arc::new(PanickingObserver), counting.clone()];
        dispatch_completed(&observers, None, doc());
        // Give the spawned tasks a chance to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(counting.completed.load(Ordering::SeqCst), 1);
    }
}
