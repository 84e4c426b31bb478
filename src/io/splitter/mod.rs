// src/io/splitter/mod.rs
//
// Two-way byte stream splitters.
//
// A classifier consumes raw bytes and decides, span by span, whether they
// belong to the pattern it recognizes (bucket 1, `Matched`) or not (bucket 0,
// `Unmatched`). A splitter is a classifier with listeners attached to its
// buckets. Classifiers keep partial-match state between calls, so a pattern
// may straddle read boundaries, and they never fail: bytes that do not match
// simply fall to bucket 0.

pub mod chain;

use std::sync::Arc;

pub use chain::SplitterChain;

/// Number of output buckets of every splitter.
pub const BUCKET_COUNT: usize = 2;

/// Output bucket of a two-way splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Bucket 0: bytes the classifier did not recognize.
    Unmatched,
    /// Bucket 1: bytes the classifier recognized.
    Matched,
}

impl Bucket {
    pub fn index(self) -> usize {
        match self {
            Bucket::Unmatched => 0,
            Bucket::Matched => 1,
        }
    }

    /// Bucket 0 is `Unmatched`, any other number is `Matched`.
    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            Bucket::Unmatched
        } else {
            Bucket::Matched
        }
    }
}

/// Receiver of byte spans coming out of a splitter bucket.
pub trait ByteListener: Send + Sync {
    fn received(&self, data: &[u8]);
}

impl<F> ByteListener for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn received(&self, data: &[u8]) {
        self(data)
    }
}

/// Listener handle that may be installed on several buckets at once.
pub type SharedListener = Arc<dyn ByteListener>;

/// Pattern recognizer behind a splitter stage.
///
/// `classify` reports every input byte exactly once through `emit`, in stream
/// order, either immediately or on a later call once a buffered candidate has
/// been resolved. `flush` resolves anything still buffered as `Unmatched`.
pub trait Classifier: Send {
    fn classify(&mut self, data: &[u8], emit: &mut dyn FnMut(Bucket, &[u8]));
    fn flush(&mut self, emit: &mut dyn FnMut(Bucket, &[u8]));
}

/// A stream splitter: bytes in, two listener buckets out.
pub trait Splitter: Send {
    /// Feed the next chunk of the stream.
    fn received(&mut self, data: &[u8]);

    /// Install or clear the listener of a bucket. Output of a bucket without
    /// a listener is dropped.
    fn set_listener(&mut self, bucket: Bucket, listener: Option<SharedListener>);

    fn bucket_count(&self) -> usize {
        BUCKET_COUNT
    }

    /// Resolve any buffered partial match as unmatched output.
    fn flush(&mut self);
}

/// A single classifier with its two bucket listeners.
pub struct ClassifierStage {
    classifier: Box<dyn Classifier>,
    listeners: [Option<SharedListener>; BUCKET_COUNT],
}

impl ClassifierStage {
    pub fn new(classifier: impl Classifier + 'static) -> Self {
        Self::boxed(Box::new(classifier))
    }

    pub fn boxed(classifier: Box<dyn Classifier>) -> Self {
        ClassifierStage {
            classifier,
            listeners: [None, None],
        }
    }
}

fn deliver(listeners: &[Option<SharedListener>; BUCKET_COUNT], bucket: Bucket, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    if let Some(listener) = &listeners[bucket.index()] {
        listener.received(data);
    }
}

impl Splitter for ClassifierStage {
    fn received(&mut self, data: &[u8]) {
        let ClassifierStage {
            classifier,
            listeners,
        } = self;
        classifier.classify(data, &mut |bucket, span| deliver(listeners, bucket, span));
    }

    fn set_listener(&mut self, bucket: Bucket, listener: Option<SharedListener>) {
        self.listeners[bucket.index()] = listener;
    }

    fn flush(&mut self) {
        let ClassifierStage {
            classifier,
            listeners,
        } = self;
        classifier.flush(&mut |bucket, span| deliver(listeners, bucket, span));
    }
}
