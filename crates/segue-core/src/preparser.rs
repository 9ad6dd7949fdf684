//! Preparser: media probing on the background worker.
//!
//! The actual probing is done by a [`MediaParser`] supplied by the caller
//! (a tag reader, a directory scanner...). The preparser runs its jobs on a
//! [`BackgroundWorker`], merges the metadata found into the media, and hands
//! the outcome to the completion callback given at push time.
//!
//! A parser working on another thread calls [`ParseWaker::wake`] when it
//! makes progress, so the job is probed again before its deadline.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::models::{Media, MediaMeta, MediaNode};
use crate::worker::{BackgroundWorker, TaskEnd, WorkerCallbacks};

/// What a finished job found.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub meta: MediaMeta,
    /// Set when the media turned out to be a container of other media.
    pub subitems: Option<MediaNode>,
}

#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Done(ParseResult),
    Failed,
    /// Cancelled while running. Jobs cancelled while still queued are
    /// dropped without a callback.
    Cancelled,
    TimedOut,
}

pub trait MediaParser: Send + Sync + 'static {
    type Job: Send + 'static;

    /// Begin probing. `None` means the media cannot be parsed.
    fn start(&self, media: &Media, waker: ParseWaker) -> Option<Self::Job>;

    /// Cheap, non-blocking check.
    fn is_done(&self, job: &mut Self::Job) -> bool;

    /// Collect the result of a job `is_done` accepted. `None` = failed.
    fn finish(&self, job: Self::Job) -> Option<ParseResult>;

    /// Give up on a job that was cancelled or timed out.
    fn abort(&self, _job: Self::Job) {}
}

/// Asks the preparser to probe its running jobs again.
#[derive(Clone)]
pub struct ParseWaker {
    wake: Arc<dyn Fn() + Send + Sync>,
}

impl ParseWaker {
    pub fn wake(&self) {
        (self.wake)()
    }
}

impl fmt::Debug for ParseWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParseWaker")
    }
}

pub type ParseDone = Box<dyn FnOnce(&Media, ParseOutcome) + Send>;

pub struct ParseRequest {
    media: Media,
    done: ParseDone,
}

pub enum ParseJob<J> {
    Running(J),
    /// `MediaParser::start` refused; reported as `Failed` on the first probe.
    Failed,
}

pub struct ParseCallbacks<P: MediaParser> {
    parser: P,
    worker: Weak<BackgroundWorker<ParseCallbacks<P>>>,
}

impl<P: MediaParser> WorkerCallbacks for ParseCallbacks<P> {
    type Entity = ParseRequest;
    type Id = u64;
    type Handle = ParseJob<P::Job>;

    fn start(&self, request: &ParseRequest) -> Option<Self::Handle> {
        let worker = self.worker.clone();
        let waker = ParseWaker {
            wake: Arc::new(move || {
                if let Some(worker) = worker.upgrade() {
                    worker.request_probe();
                }
            }),
        };
        match self.parser.start(&request.media, waker) {
            Some(job) => Some(ParseJob::Running(job)),
            None => {
                log::warn!("segue: cannot parse {}", request.media.uri());
                Some(ParseJob::Failed)
            }
        }
    }

    fn probe(&self, handle: &mut Self::Handle) -> bool {
        match handle {
            ParseJob::Running(job) => self.parser.is_done(job),
            ParseJob::Failed => true,
        }
    }

    fn stop(&self, request: ParseRequest, handle: Self::Handle, end: TaskEnd) {
        let outcome = match (handle, end) {
            (ParseJob::Failed, _) => ParseOutcome::Failed,
            (ParseJob::Running(job), TaskEnd::Completed) => match self.parser.finish(job) {
                Some(result) => ParseOutcome::Done(result),
                None => ParseOutcome::Failed,
            },
            (ParseJob::Running(job), TaskEnd::Cancelled) => {
                self.parser.abort(job);
                ParseOutcome::Cancelled
            }
            (ParseJob::Running(job), TaskEnd::TimedOut) => {
                self.parser.abort(job);
                ParseOutcome::TimedOut
            }
        };

        if let ParseOutcome::Done(result) = &outcome {
            let meta = result.meta.clone();
            request.media.update_meta(|current| current.merge(meta));
        }
        log::debug!("segue: preparse of {} ended: {:?}", request.media.uri(), end);
        (request.done)(&request.media, outcome);
    }
}

pub struct Preparser<P: MediaParser> {
    worker: Arc<BackgroundWorker<ParseCallbacks<P>>>,
}

impl<P: MediaParser> Preparser<P> {
    pub fn new(config: &WorkerConfig, parser: P) -> Self {
        let worker = Arc::new_cyclic(|weak| {
            BackgroundWorker::new(config, ParseCallbacks { parser, worker: weak.clone() })
        });
        Self { worker }
    }

    /// Queue a media for parsing. `done` runs on a worker thread.
    pub fn push(
        &self,
        media: Media,
        id: u64,
        timeout: Option<Duration>,
        done: impl FnOnce(&Media, ParseOutcome) + Send + 'static,
    ) -> Result<()> {
        self.worker.push(ParseRequest { media, done: Box::new(done) }, id, timeout)
    }

    pub fn cancel(&self, id: Option<u64>) {
        self.worker.cancel(id.as_ref());
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.worker.uncompleted()
    }

    pub fn parser(&self) -> &P {
        &self.worker.callbacks().parser
    }
}

/// Type-erased submission, so a playlist can hold any preparser.
pub(crate) trait PreparseQueue: Send + Sync {
    fn submit(&self, media: Media, id: u64, done: ParseDone) -> Result<()>;
    fn cancel(&self, id: Option<u64>);
}

impl<P: MediaParser> PreparseQueue for Preparser<P> {
    fn submit(&self, media: Media, id: u64, done: ParseDone) -> Result<()> {
        self.worker.push(ParseRequest { media, done }, id, None)
    }

    fn cancel(&self, id: Option<u64>) {
        Preparser::cancel(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Resolves every media after `delay`, on its own thread. URIs ending
    /// in `.m3u` resolve into two sub-items; `bad:` URIs are refused.
    struct SlowParser {
        delay: Duration,
    }

    impl MediaParser for SlowParser {
        type Job = (Arc<AtomicBool>, String);

        fn start(&self, media: &Media, waker: ParseWaker) -> Option<Self::Job> {
            if media.uri().starts_with("bad:") {
                return None;
            }
            let done = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&done);
            let delay = self.delay;
            thread::spawn(move || {
                thread::sleep(delay);
                flag.store(true, Ordering::SeqCst);
                waker.wake();
            });
            Some((done, media.uri().to_string()))
        }

        fn is_done(&self, job: &mut Self::Job) -> bool {
            job.0.load(Ordering::SeqCst)
        }

        fn finish(&self, (_, uri): Self::Job) -> Option<ParseResult> {
            let subitems = uri.ends_with(".m3u").then(|| {
                MediaNode::with_children(
                    Media::new(uri.clone()),
                    vec![MediaNode::new(Media::new("one")), MediaNode::new(Media::new("two"))],
                )
            });
            Some(ParseResult {
                meta: MediaMeta { title: Some(format!("parsed {}", uri)), ..MediaMeta::default() },
                subitems,
            })
        }
    }

    fn preparser(delay: Duration) -> Preparser<SlowParser> {
        let config = WorkerConfig { max_threads: 2, default_timeout_ms: 5_000, idle_timeout_ms: 200 };
        Preparser::new(&config, SlowParser { delay })
    }

    fn outcomes() -> (impl Fn() -> ParseDone, Receiver<(String, ParseOutcome)>) {
        let (tx, rx) = unbounded();
        let make = move || -> ParseDone {
            let tx = tx.clone();
            Box::new(move |media: &Media, outcome| {
                let _ = tx.send((media.uri().to_string(), outcome));
            })
        };
        (make, rx)
    }

    #[test]
    fn done_merges_metadata() {
        let preparser = preparser(Duration::from_millis(20));
        let (done, rx) = outcomes();
        let media = Media::new("file:///song.flac");
        preparser.push(media.clone(), 1, None, done()).unwrap();

        let (uri, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(uri, "file:///song.flac");
        assert!(matches!(outcome, ParseOutcome::Done(ParseResult { subitems: None, .. })));
        assert_eq!(media.meta().title.as_deref(), Some("parsed file:///song.flac"));
    }

    #[test]
    fn containers_report_subitems() {
        let preparser = preparser(Duration::from_millis(5));
        let (done, rx) = outcomes();
        preparser.push(Media::new("list.m3u"), 1, None, done()).unwrap();

        let (_, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match outcome {
            ParseOutcome::Done(result) => assert_eq!(result.subitems.unwrap().flatten().len(), 2),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn refused_media_fails() {
        let preparser = preparser(Duration::from_millis(5));
        let (done, rx) = outcomes();
        preparser.push(Media::new("bad:thing"), 1, None, done()).unwrap();
        let (_, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, ParseOutcome::Failed));
    }

    #[test]
    fn slow_jobs_time_out() {
        let preparser = preparser(Duration::from_secs(2));
        let (done, rx) = outcomes();
        let media = Media::new("slow");
        preparser.push(media.clone(), 1, Some(Duration::from_millis(30)), done()).unwrap();
        let (_, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, ParseOutcome::TimedOut));
        assert!(media.meta().title.is_none());
    }

    #[test]
    fn cancel_running_job() {
        let preparser = preparser(Duration::from_secs(2));
        let (done, rx) = outcomes();
        preparser.push(Media::new("a"), 7, Some(Duration::ZERO), done()).unwrap();
        thread::sleep(Duration::from_millis(50));
        preparser.cancel(Some(7));
        let (_, outcome) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, ParseOutcome::Cancelled));
    }
}
