use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use revealer::Dumper;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::AgentError;
use crate::logging;

/// Background task reloading the forced-branch table whenever the reload signal arrives.
pub struct ReloadSupervisor {
    signal: i32,
    reloads: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReloadSupervisor {
    /// Returns once the signal handler is installed.
    pub fn spawn(dumper: Arc<Dumper>, signal: i32) -> Result<Self, AgentError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reloads);

        let handle = std::thread::Builder::new()
            .name("rv-reload".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                runtime.block_on(supervise(dumper, signal, counter, ready_tx, shutdown_rx));
            })
            .map_err(|source| AgentError::Signal { signal, source })?;

        let ready = ready_rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(std::io::Error::other("reload task exited early")));
        if let Err(source) = ready {
            if handle.join().is_err() {
                warn!("reload thread panicked");
            }
            return Err(AgentError::Signal { signal, source });
        }

        info!("{} reloading on signal {signal}", logging::category_rules());
        Ok(Self {
            signal,
            reloads,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn signal(&self) -> i32 {
        self.signal
    }

    /// Number of reloads performed so far.
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Requests shutdown and joins the task.
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("reload thread panicked");
        }
    }
}

impl Drop for ReloadSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
async fn supervise(
    dumper: Arc<Dumper>,
    signal: i32,
    reloads: Arc<AtomicUsize>,
    ready: oneshot::Sender<std::io::Result<()>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    use tokio::signal::unix::{SignalKind, signal as listen};

    let mut stream = match listen(SignalKind::from_raw(signal)) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = stream.recv() => {
                if received.is_none() {
                    break;
                }
                let count = dumper.reload_force_branches();
                reloads.fetch_add(1, Ordering::SeqCst);
                info!("{} reloaded on signal {signal}, {count} active", logging::category_rules());
            }
        }
    }
}

#[cfg(not(unix))]
async fn supervise(
    _dumper: Arc<Dumper>,
    signal: i32,
    _reloads: Arc<AtomicUsize>,
    ready: oneshot::Sender<std::io::Result<()>>,
    shutdown: oneshot::Receiver<()>,
) {
    warn!(signal, "reload signals are unsupported on this platform");
    let _ = ready.send(Ok(()));
    let _ = shutdown.await;
}
