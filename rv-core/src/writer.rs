use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::records::SymbolRecord;

#[derive(Debug, Clone)]
pub struct WriteJob {
    pub path: PathBuf,
    pub index: u32,
    pub record: SymbolRecord,
}

enum WriterMessage {
    Job(WriteJob),
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// Single background consumer appending records to their table files.
pub struct RecordWriter {
    sender: mpsc::UnboundedSender<WriterMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecordWriter {
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("rv-writer".to_string())
            .spawn(move || run(receiver))?;
        Ok(Self {
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a job; never blocks. Jobs sent after shutdown are dropped.
    pub fn submit(&self, job: WriteJob) {
        if let Err(err) = self.sender.send(WriterMessage::Job(job))
            && let WriterMessage::Job(job) = err.0
        {
            warn!(path = %job.path.display(), "writer stopped, dropping record");
        }
    }

    /// Blocks until every job queued before this call has been written.
    pub fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(WriterMessage::Barrier(done)).is_ok() {
            let _ = wait.blocking_recv();
        }
    }

    /// Drains the queue and joins the worker thread.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.sender.send(WriterMessage::Shutdown);
        if handle.join().is_err() {
            warn!("writer thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut receiver: mpsc::UnboundedReceiver<WriterMessage>) {
    let mut buf = Vec::new();
    while let Some(message) = receiver.blocking_recv() {
        match message {
            WriterMessage::Job(job) => {
                buf.clear();
                job.record.encode(job.index, &mut buf);
                append(&job, &buf);
            }
            WriterMessage::Barrier(done) => {
                let _ = done.send(());
            }
            WriterMessage::Shutdown => break,
        }
    }
    debug!("writer drained");
}

fn append(job: &WriteJob, bytes: &[u8]) {
    let mut file = match OpenOptions::new().create(true).append(true).open(&job.path) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %job.path.display(), error = %err, "open failed, dropping record");
            return;
        }
    };
    if let Err(err) = file.write_all(bytes).and_then(|()| file.flush()) {
        warn!(path = %job.path.display(), error = %err, "write failed, dropping record");
    }
}
