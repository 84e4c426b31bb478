// src/io/debug_channel/mod.rs
//
// Silicon Labs debug channel (DCH): frame layout, stream classifier,
// message type and the collector that dispatches decoded messages.

mod classifier;
mod collector;
pub mod frame;
mod message;

pub use classifier::DebugChannelClassifier;
pub use collector::{DebugMessageCollector, DebugMessageListener};
pub use frame::{FrameHeader, FrameVersion};
pub use message::DebugMessage;

use crate::io::splitter::{Classifier, SplitterChain};

/// Default TCP port of the debug channel on a WSTK adapter
pub const DEBUG_CHANNEL_PORT: u16 = 4905;

/// Splitter chain that extracts frames of every supported layout version.
pub fn debug_channel_chain() -> Result<SplitterChain, String> {
    let stages: Vec<Box<dyn Classifier>> = FrameVersion::ALL
        .into_iter()
        .map(|v| Box::new(DebugChannelClassifier::new(v)) as Box<dyn Classifier>)
        .collect();
    SplitterChain::new(stages)
}
