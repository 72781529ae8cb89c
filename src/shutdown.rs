//! Process-wide graceful shutdown coordination (spec.md §5 "Closure
//! discipline"). Generalizes the teacher's `GracefulShutdown`
//! (`graceful_shutdown.rs`), dropping its hard-coded resolver/cache-save
//! step — persistence is the cache module's own concern, triggered by
//! whoever owns the cache instance — and keeping the broadcast-based
//! "close once, drain registered components" shape.

use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{error, info, warn};

type ShutdownResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type ShutdownFn = Box<dyn Fn() -> tokio::task::JoinHandle<ShutdownResult> + Send + Sync>;

struct Component {
    name: String,
    shutdown_fn: ShutdownFn,
}

/// A process-wide "close once" coordinator. Each subsystem (listener,
/// upstream pool, cache sweeper, rate limiter GC) registers a shutdown
/// hook; any fatal subsystem error or an external signal triggers
/// `shutdown()`, which drains every hook with a bounded timeout.
pub struct Shutdown {
    shutdown_tx: broadcast::Sender<()>,
    components: Mutex<Vec<Component>>,
    component_timeout: Duration,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::with_component_timeout(Duration::from_secs(5))
    }

    pub fn with_component_timeout(component_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx, components: Mutex::new(Vec::new()), component_timeout }
    }

    /// A receiver subsystems select! against to notice shutdown has
    /// started without needing to be registered as a component.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub async fn register_component<F, Fut>(&self, name: impl Into<String>, shutdown_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ShutdownResult> + Send + 'static,
    {
        let component = Component {
            name: name.into(),
            shutdown_fn: Box::new(move || tokio::spawn(shutdown_fn())),
        };
        self.components.lock().await.push(component);
    }

    /// Idempotent in effect: a second call re-sends the (ignored-if-no-
    /// receivers) signal and re-drains an already-empty component list.
    pub async fn shutdown(&self) {
        info!("initiating graceful shutdown");
        if self.shutdown_tx.send(()).is_err() {
            warn!("shutdown signal had no subscribers");
        }

        let components = self.components.lock().await;
        let mut handles = Vec::with_capacity(components.len());
        for component in components.iter() {
            info!(component = %component.name, "shutting down component");
            handles.push((component.name.clone(), (component.shutdown_fn)()));
        }
        drop(components);

        for (name, handle) in handles {
            match timeout(self.component_timeout, handle).await {
                Ok(Ok(Ok(()))) => info!(component = %name, "component shut down"),
                Ok(Ok(Err(e))) => error!(component = %name, error = %e, "component shutdown failed"),
                Ok(Err(e)) => error!(component = %name, error = %e, "component shutdown task panicked"),
                Err(_) => warn!(component = %name, "component shutdown timed out"),
            }
        }
        info!("graceful shutdown complete");
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn shutdown_runs_registered_components() {
        let shutdown = Shutdown::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = Arc::clone(&ran);
        shutdown
            .register_component("test", move || {
                let ran2 = Arc::clone(&ran2);
                async move {
                    ran2.store(true, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        shutdown.shutdown().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn subscribers_see_the_signal() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        shutdown.shutdown().await;
        assert!(rx.recv().await.is_ok());
    }
}
