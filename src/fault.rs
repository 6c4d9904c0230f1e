//! Fatal-error reporting (design note, spec §9): the source's fatal paths
//! call `os.Exit`; library code here never does. Instead a fatal
//! condition is sent down a bounded channel that the binary's `main`
//! drains, logs, and turns into a real process exit — the only place in
//! the crate allowed to do so.

use crate::error::AppError;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum Fault {
    /// A write failed in a way that is not retryable, or the retry cap was
    /// exhausted (spec §4.E, §7).
    WriteFatal(AppError),
    /// DDL execution failed during a schema change (spec §4.F.4).
    SchemaChangeFatal(AppError),
}

impl Fault {
    pub fn into_error(self) -> AppError {
        match self {
            Fault::WriteFatal(e) => e,
            Fault::SchemaChangeFatal(e) => e,
        }
    }
}

#[derive(Clone)]
pub struct FaultSender(mpsc::Sender<Fault>);

pub struct FaultReceiver(mpsc::Receiver<Fault>);

/// A depth of 1 is enough: the first fault reported drives shutdown, and
/// `main` exits on it rather than accumulating a backlog.
pub fn fault_channel() -> (FaultSender, FaultReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (FaultSender(tx), FaultReceiver(rx))
}

impl FaultSender {
    pub async fn report(&self, fault: Fault) {
        // A full or closed channel means a fault is already in flight (or
        // main has exited) — either way there's nothing more useful to do.
        let _ = self.0.send(fault).await;
    }
}

impl FaultReceiver {
    pub async fn recv(&mut self) -> Option<Fault> {
        self.0.recv().await
    }
}
