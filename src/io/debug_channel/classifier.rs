// src/io/debug_channel/classifier.rs
//
// Classifier that picks debug channel frames of one layout version out of a
// byte stream that also carries plain text.
//
// Everything that is not (yet) known to be a frame is emitted as unmatched
// as soon as possible. Bytes starting at a start marker are held until the
// frame is either complete (emitted as one matched span) or ruled out, in
// which case the marker byte is released as unmatched and scanning resumes
// right after it.

use super::frame::{check_frame, FrameCheck, FrameVersion, FRAME_START};
use crate::io::splitter::{Bucket, Classifier};

pub struct DebugChannelClassifier {
    version: FrameVersion,
    /// Unresolved bytes; always empty or starting with a start marker
    /// between calls.
    pending: Vec<u8>,
}

impl DebugChannelClassifier {
    pub fn new(version: FrameVersion) -> Self {
        DebugChannelClassifier {
            version,
            pending: Vec::new(),
        }
    }

    fn resolve(&mut self, emit: &mut dyn FnMut(Bucket, &[u8])) {
        loop {
            if self.pending.is_empty() {
                return;
            }

            if self.pending[0] != FRAME_START {
                let text_len = self
                    .pending
                    .iter()
                    .position(|&b| b == FRAME_START)
                    .unwrap_or(self.pending.len());
                emit(Bucket::Unmatched, &self.pending[..text_len]);
                self.pending.drain(..text_len);
                continue;
            }

            match check_frame(self.version, &self.pending) {
                FrameCheck::Incomplete => return,
                FrameCheck::Complete(len) => {
                    emit(Bucket::Matched, &self.pending[..len]);
                    self.pending.drain(..len);
                }
                FrameCheck::Invalid => {
                    emit(Bucket::Unmatched, &self.pending[..1]);
                    self.pending.drain(..1);
                }
            }
        }
    }
}

impl Classifier for DebugChannelClassifier {
    fn classify(&mut self, data: &[u8], emit: &mut dyn FnMut(Bucket, &[u8])) {
        if self.pending.is_empty() {
            // Fast path: pass leading text straight through without buffering.
            let text_len = data
                .iter()
                .position(|&b| b == FRAME_START)
                .unwrap_or(data.len());
            if text_len > 0 {
                emit(Bucket::Unmatched, &data[..text_len]);
            }
            self.pending.extend_from_slice(&data[text_len..]);
        } else {
            self.pending.extend_from_slice(data);
        }
        self.resolve(emit);
    }

    fn flush(&mut self, emit: &mut dyn FnMut(Bucket, &[u8])) {
        if !self.pending.is_empty() {
            emit(Bucket::Unmatched, &self.pending);
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame::{encode_frame, v2_header, v3_header};
    use super::*;
    use crate::io::splitter::testing::Collector;
    use crate::io::splitter::{ClassifierStage, Splitter, SplitterChain};

    fn stage(version: FrameVersion) -> (ClassifierStage, std::sync::Arc<Collector>, std::sync::Arc<Collector>) {
        let matched = Collector::shared();
        let unmatched = Collector::shared();
        let mut stage = ClassifierStage::new(DebugChannelClassifier::new(version));
        stage.set_listener(Bucket::Matched, Some(matched.clone()));
        stage.set_listener(Bucket::Unmatched, Some(unmatched.clone()));
        (stage, matched, unmatched)
    }

    #[test]
    fn test_frames_separated_from_text() {
        let f1 = encode_frame(&v2_header(1), b"abc");
        let f2 = encode_frame(&v2_header(2), b"");
        let mut input = b"boot ok\r\n".to_vec();
        input.extend_from_slice(&f1);
        input.extend_from_slice(b"> ");
        input.extend_from_slice(&f2);
        input.extend_from_slice(b"[done]\n");

        let (mut stage, matched, unmatched) = stage(FrameVersion::V2);
        stage.received(&input);
        stage.flush();

        assert_eq!(matched.spans(), vec![f1, f2]);
        assert_eq!(unmatched.bytes(), b"boot ok\r\n> [done]\n".to_vec());
    }

    #[test]
    fn test_frame_straddling_reads() {
        let frame = encode_frame(&v3_header(7, 1), b"payload");
        let mut input = b"text".to_vec();
        input.extend_from_slice(&frame);

        let (mut stage, matched, unmatched) = stage(FrameVersion::V3);
        for byte in &input {
            stage.received(std::slice::from_ref(byte));
        }

        assert_eq!(matched.spans(), vec![frame]);
        assert_eq!(unmatched.bytes(), b"text".to_vec());
    }

    #[test]
    fn test_rejected_candidate_rescans_for_frame() {
        // A stray marker whose "length" covers the start of a real frame.
        let frame = encode_frame(&v2_header(3), b"x");
        let mut input = vec![b'[', 30];
        input.extend_from_slice(&frame);

        let (mut stage, matched, unmatched) = stage(FrameVersion::V2);
        stage.received(&input);

        assert_eq!(matched.spans(), vec![frame]);
        assert_eq!(unmatched.bytes(), vec![b'[', 30]);
    }

    #[test]
    fn test_truncated_frame_released_on_flush() {
        let frame = encode_frame(&v2_header(3), b"xyz");
        let partial = &frame[..frame.len() - 2];

        let (mut stage, matched, unmatched) = stage(FrameVersion::V2);
        stage.received(partial);
        assert!(unmatched.bytes().is_empty());
        stage.flush();

        assert!(matched.spans().is_empty());
        assert_eq!(unmatched.bytes(), partial.to_vec());
    }

    #[test]
    fn test_version_chain_collects_both_layouts() {
        let v2 = encode_frame(&v2_header(1), b"two");
        let v3 = encode_frame(&v3_header(1, 5), b"three");
        let mut input = v3.clone();
        input.extend_from_slice(b"--");
        input.extend_from_slice(&v2);

        let mut chain = SplitterChain::new(vec![
            Box::new(DebugChannelClassifier::new(FrameVersion::V2)),
            Box::new(DebugChannelClassifier::new(FrameVersion::V3)),
        ])
        .unwrap();
        let matched = Collector::shared();
        let unmatched = Collector::shared();
        chain.set_listener(Bucket::Matched, Some(matched.clone()));
        chain.set_listener(Bucket::Unmatched, Some(unmatched.clone()));

        for chunk in input.chunks(3) {
            chain.received(chunk);
        }
        chain.flush();

        assert_eq!(matched.spans(), vec![v3, v2]);
        assert_eq!(unmatched.bytes(), b"--".to_vec());
    }
}
