//! Byte stream to typed messages, and command ids to bytes.

pub mod classifier;
pub mod commands;
pub mod framer;
pub mod reports;
pub mod sequence;

pub use classifier::{ClassifiedMessage, Classifier, MessageKind};
pub use commands::{Acknowledgement, Command, CommandError, CommandParams};
pub use framer::{Framer, FramerConfig, FramingError, RawFrame};
pub use reports::{
    input_label_code, parse_report, parse_status_response, DynamicRange, FullInfo, Report,
    ReportError, SourceMode,
};
pub use sequence::SequenceCounter;
