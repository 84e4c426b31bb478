// src/io/splitter/chain.rs
//
// Serial composition of two-way splitters.
//
// With stages s0, s1, s2 the chain is wired as:
//
//   input => s0 -> s1 -> s2 ---> bucket 0
//             \-----\-----\---> bucket 1
//
// Bucket 0 of each stage feeds the next stage, so the chain's bucket 0 only
// carries bytes that no stage recognized. Bucket 1 of every stage goes to the
// same shared listener, so the chain's bucket 1 carries everything any stage
// recognized, in the order it was recognized.

use super::{
    deliver, Bucket, Classifier, ClassifierStage, SharedListener, Splitter, BUCKET_COUNT,
};

pub struct SplitterChain {
    stages: Vec<ClassifierStage>,
}

impl SplitterChain {
    /// Build a chain from the given classifiers, in stream order.
    pub fn new(classifiers: Vec<Box<dyn Classifier>>) -> Result<Self, String> {
        if classifiers.is_empty() {
            return Err("A splitter chain needs at least one stage".to_string());
        }
        Ok(SplitterChain {
            stages: classifiers.into_iter().map(ClassifierStage::boxed).collect(),
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Push `data` into the first of `stages`, cascading bucket 0 downstream.
fn feed(stages: &mut [ClassifierStage], data: &[u8]) {
    let Some((head, rest)) = stages.split_first_mut() else {
        return;
    };
    let ClassifierStage {
        classifier,
        listeners,
    } = head;
    classifier.classify(data, &mut |bucket, span| route(listeners, rest, bucket, span));
}

fn route(
    listeners: &[Option<SharedListener>; BUCKET_COUNT],
    rest: &mut [ClassifierStage],
    bucket: Bucket,
    span: &[u8],
) {
    match bucket {
        Bucket::Unmatched if !rest.is_empty() => feed(rest, span),
        _ => deliver(listeners, bucket, span),
    }
}

impl Splitter for SplitterChain {
    fn received(&mut self, data: &[u8]) {
        feed(&mut self.stages, data);
    }

    fn set_listener(&mut self, bucket: Bucket, listener: Option<SharedListener>) {
        match bucket {
            Bucket::Unmatched => {
                if let Some(last) = self.stages.last_mut() {
                    last.set_listener(Bucket::Unmatched, listener);
                }
            }
            Bucket::Matched => {
                for stage in &mut self.stages {
                    stage.set_listener(Bucket::Matched, listener.clone());
                }
            }
        }
    }

    fn bucket_count(&self) -> usize {
        self.stages
            .first()
            .map(|s| s.bucket_count())
            .unwrap_or(BUCKET_COUNT)
    }

    fn flush(&mut self) {
        // Each stage drains into the ones after it before those are flushed.
        for i in 0..self.stages.len() {
            let Some((head, rest)) = self.stages[i..].split_first_mut() else {
                break;
            };
            let ClassifierStage {
                classifier,
                listeners,
            } = head;
            classifier.flush(&mut |bucket, span| route(listeners, rest, bucket, span));
        }
    }
}
