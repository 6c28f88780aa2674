// Wire models: samples, settings snapshot, UI and host protocol messages

mod host;
mod message;
mod sample;
mod settings;

pub use host::{FromHostMessage, KernelDescriptor, NotebookRef, ToHostMessage};
pub use message::{FromClientMessage, GraphOption, GraphSide, ToClientMessage};
pub use sample::{CpuReading, MemoryReading, Sample, align_to_second, now_ms};
pub use settings::{MetricKey, MetricKind, Settings};
