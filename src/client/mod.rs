// UI-context side of the pipeline: series store, metric behaviors, lanes, chart, preview

pub mod animation;
pub mod chart;
pub mod context;
pub mod format;
pub mod lane;
pub mod metric;
pub mod path;
pub mod preview;
pub mod series;
pub mod settings;

pub use animation::{FrameHandle, FrameQueue, FrameTarget};
pub use chart::{Chart, ChartLayout, ConfiguratorEntry, ConfiguratorPlacement, ValueLabel};
pub use context::UiContext;
pub use preview::{PreviewConfig, PreviewHandle};
pub use metric::{Metric, MetricSource, Series};
pub use path::{Path, Segment};
pub use series::{DerivativeSeries, MetricSeries, Point, capacity_for};
pub use settings::{ClientSettings, Palette};
