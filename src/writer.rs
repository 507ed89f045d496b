//! The write engine: one worker, strict submission order, event reporting.
//!
//! A [`Writer`] owns a worker thread fed by a capacity-1 job channel. Files
//! are committed to the underlying [`PackTarget`] in the exact order
//! [`Writer::add`] was called; a caller that submits faster than the target
//! can write simply blocks on the queue. The worker reports through
//! [`WriteEvent`]s: one `FileAdded` per committed file, at most one `Error`,
//! and always exactly one final `Finished` — an error halts the queue but
//! never suppresses completion, so a consumer waiting on `Finished` cannot
//! hang.

pub mod dir;
pub mod tar;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::descriptor::FileDescriptor;
use crate::digest::DigestAlgorithm;

/// A destination format the write engine can commit files to.
///
/// Implementations serialize one file at a time; the engine guarantees the
/// calls arrive strictly ordered and never overlap.
pub trait PackTarget {
    /// Prepare the destination. Called once, before any file is queued, so
    /// configuration problems (bad extension, unwritable parent) surface
    /// here and not mid-stream.
    fn open(&mut self) -> anyhow::Result<()>;

    /// Stream one file's bytes into the destination, populating
    /// `descriptor.digests` for each requested algorithm in the same pass.
    fn write_file(
        &mut self,
        descriptor: &mut FileDescriptor,
        algorithms: &[DigestAlgorithm],
    ) -> anyhow::Result<()>;

    /// Write any trailer and flush. Called once, after the last file.
    fn finish(&mut self) -> anyhow::Result<()>;
}

/// Notifications emitted by the worker, in order.
#[derive(Debug)]
pub enum WriteEvent {
    /// One file was committed. Carries the descriptor with its digests
    /// populated, and the progress at the moment of commit.
    FileAdded {
        descriptor: FileDescriptor,
        percent_complete: f64,
    },
    /// A file failed. The queue is halted: entries already submitted are
    /// discarded and later `add` calls are rejected.
    Error { message: String },
    /// Always the last event, success or failure. Carries both counters so
    /// the caller can reconcile them.
    Finished { files_added: u64, files_written: u64 },
}

/// Final accounting, returned by [`Writer::finish`].
#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub files_added: u64,
    pub files_written: u64,
    /// Set when a file or the trailer failed; `files_written` then stops
    /// short of `files_added`.
    pub error: Option<String>,
}

impl WriteSummary {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.files_added == self.files_written
    }
}

struct Job {
    descriptor: FileDescriptor,
    algorithms: Vec<DigestAlgorithm>,
}

/// The serialized write queue over some [`PackTarget`].
pub struct Writer {
    jobs: Option<Sender<Job>>,
    events: Receiver<WriteEvent>,
    files_added: Arc<AtomicU64>,
    files_written: Arc<AtomicU64>,
    worker: Option<JoinHandle<WriteSummary>>,
}

impl Writer {
    /// Opens the target and starts the worker. Fails eagerly if the target
    /// cannot be prepared, before anything is queued.
    pub fn new<T>(mut target: T) -> anyhow::Result<Self>
    where
        T: PackTarget + Send + 'static,
    {
        target.open().with_context(|| "Opening write destination")?;

        // Capacity 1: at most one entry waits while another is committed.
        let (job_tx, job_rx) = bounded::<Job>(1);
        let (event_tx, event_rx) = unbounded::<WriteEvent>();
        let files_added = Arc::new(AtomicU64::new(0));
        let files_written = Arc::new(AtomicU64::new(0));

        let added = Arc::clone(&files_added);
        let written = Arc::clone(&files_written);
        let worker = thread::spawn(move || run_worker(target, job_rx, event_tx, added, written));

        Ok(Self {
            jobs: Some(job_tx),
            events: event_rx,
            files_added,
            files_written,
            worker: Some(worker),
        })
    }

    /// Queue one file for writing. Blocks while the queue is full; the
    /// result of the write itself is observed through events or the final
    /// summary. Fails if the worker has already shut down after an error.
    pub fn add(
        &mut self,
        descriptor: FileDescriptor,
        algorithms: &[DigestAlgorithm],
    ) -> anyhow::Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .with_context(|| "Writer is already finished")?;
        self.files_added.fetch_add(1, Ordering::SeqCst);
        log::debug!("Queueing file: {}", descriptor.dest_path);
        jobs.send(Job {
            descriptor,
            algorithms: algorithms.to_vec(),
        })
        .with_context(|| "Write queue is gone; the worker shut down after an error")?;
        Ok(())
    }

    /// A receiver for the worker's events. Clone-cheap; the final
    /// `Finished` event is delivered exactly once per writer.
    pub fn events(&self) -> Receiver<WriteEvent> {
        self.events.clone()
    }

    /// `files_written / files_added * 100`; `0.0` before anything is added.
    pub fn percent_complete(&self) -> f64 {
        let added = self.files_added.load(Ordering::SeqCst);
        if added == 0 {
            return 0.0;
        }
        let written = self.files_written.load(Ordering::SeqCst);
        written as f64 / added as f64 * 100.0
    }

    /// Closes the queue and waits for the last committed write (and the
    /// target's trailer) to complete. Completion is synchronous here: when
    /// this returns, every byte is written — there is no drain polling.
    pub fn finish(mut self) -> anyhow::Result<WriteSummary> {
        self.jobs.take();
        let worker = self
            .worker
            .take()
            .with_context(|| "Writer is already finished")?;
        match worker.join() {
            Ok(summary) => Ok(summary),
            Err(_) => anyhow::bail!("Write worker panicked"),
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // An abandoned writer still shuts its worker down cleanly.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<T: PackTarget>(
    mut target: T,
    jobs: Receiver<Job>,
    events: Sender<WriteEvent>,
    files_added: Arc<AtomicU64>,
    files_written: Arc<AtomicU64>,
) -> WriteSummary {
    let mut error: Option<String> = None;

    while let Ok(mut job) = jobs.recv() {
        if error.is_some() {
            // Queue is halted: drain without committing.
            log::debug!("Discarding queued file after error: {}", job.descriptor.dest_path);
            continue;
        }
        match target.write_file(&mut job.descriptor, &job.algorithms) {
            Ok(()) => {
                let written = files_written.fetch_add(1, Ordering::SeqCst) + 1;
                let added = files_added.load(Ordering::SeqCst);
                let percent = written as f64 / added as f64 * 100.0;
                log::debug!("Wrote file: {}", job.descriptor.dest_path);
                let _ = events.send(WriteEvent::FileAdded {
                    descriptor: job.descriptor,
                    percent_complete: percent,
                });
            }
            Err(e) => {
                let message = format!("{:#}", e);
                log::error!("Write failed: {}", message);
                error = Some(message.clone());
                let _ = events.send(WriteEvent::Error { message });
            }
        }
    }

    if error.is_none() {
        if let Err(e) = target.finish() {
            let message = format!("{:#}", e);
            log::error!("Finalizing destination failed: {}", message);
            error = Some(message.clone());
            let _ = events.send(WriteEvent::Error { message });
        }
    }

    let added = files_added.load(Ordering::SeqCst);
    let written = files_written.load(Ordering::SeqCst);
    let _ = events.send(WriteEvent::Finished {
        files_added: added,
        files_written: written,
    });
    WriteSummary {
        files_added: added,
        files_written: written,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Target that records commit order and can be told to fail.
    struct RecordingTarget {
        committed: Vec<String>,
        fail_on: Option<String>,
        finished: bool,
    }

    impl RecordingTarget {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                committed: Vec::new(),
                fail_on: fail_on.map(str::to_string),
                finished: false,
            }
        }
    }

    impl PackTarget for RecordingTarget {
        fn open(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn write_file(
            &mut self,
            descriptor: &mut FileDescriptor,
            _algorithms: &[DigestAlgorithm],
        ) -> anyhow::Result<()> {
            if self.fail_on.as_deref() == Some(descriptor.dest_path.as_str()) {
                anyhow::bail!("Refusing to write {}", descriptor.dest_path);
            }
            self.committed.push(descriptor.dest_path.clone());
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn descriptor(dest: &str) -> FileDescriptor {
        FileDescriptor::new(PathBuf::from("/dev/null"), dest, 0, 0o644, 0, 0, 0)
    }

    #[test]
    fn events_arrive_in_submission_order() {
        let mut writer = Writer::new(RecordingTarget::new(None)).unwrap();
        let events = writer.events();
        for i in 0..8 {
            writer.add(descriptor(&format!("f{}", i)), &[]).unwrap();
        }
        let summary = writer.finish().unwrap();
        assert!(summary.is_ok());
        assert_eq!(summary.files_written, 8);

        let mut seen = Vec::new();
        for event in events.iter() {
            match event {
                WriteEvent::FileAdded { descriptor, .. } => seen.push(descriptor.dest_path),
                WriteEvent::Finished { files_written, .. } => {
                    assert_eq!(files_written, 8);
                }
                WriteEvent::Error { message } => panic!("unexpected error: {}", message),
            }
        }
        let expected: Vec<String> = (0..8).map(|i| format!("f{}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn error_halts_queue_but_finished_still_fires() {
        let mut writer = Writer::new(RecordingTarget::new(Some("bad"))).unwrap();
        let events = writer.events();
        writer.add(descriptor("ok1"), &[]).unwrap();
        writer.add(descriptor("bad"), &[]).unwrap();
        // Entries after the failure may be rejected once the worker shuts
        // the queue down; either way they are not committed.
        let _ = writer.add(descriptor("ok2"), &[]);
        let summary = writer.finish().unwrap();

        assert!(summary.error.is_some());
        assert_eq!(summary.files_written, 1);

        let collected: Vec<WriteEvent> = events.iter().collect();
        let errors = collected
            .iter()
            .filter(|e| matches!(e, WriteEvent::Error { .. }))
            .count();
        let finishes = collected
            .iter()
            .filter(|e| matches!(e, WriteEvent::Finished { .. }))
            .count();
        assert_eq!(errors, 1);
        assert_eq!(finishes, 1);
        assert!(matches!(collected.last(), Some(WriteEvent::Finished { .. })));
    }

    #[test]
    fn percent_complete_is_zero_before_any_add_and_hundred_after() {
        let mut writer = Writer::new(RecordingTarget::new(None)).unwrap();
        assert_eq!(writer.percent_complete(), 0.0);
        writer.add(descriptor("a"), &[]).unwrap();
        writer.add(descriptor("b"), &[]).unwrap();
        let events = writer.events();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.files_added, 2);
        assert_eq!(summary.files_written, 2);
        // The last FileAdded event reports 100%.
        let last_percent = events
            .iter()
            .filter_map(|e| match e {
                WriteEvent::FileAdded {
                    percent_complete, ..
                } => Some(percent_complete),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(last_percent, 100.0);
    }
}
