// Supervisor <-> UI context protocol (JSON, tagged by "type")

use serde::{Deserialize, Serialize};

use super::{MetricKey, Sample, Settings};

/// Messages pushed to every visible UI context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToClientMessage {
    UpdateSettings { settings: Settings },
    AddData { data: Sample },
    BatchAddData { data: Vec<Sample> },
    /// Carried for protocol compatibility; clients only redraw on it.
    ApplyData {
        #[serde(default)]
        title: String,
        #[serde(default)]
        data: Vec<Vec<f64>>,
    },
    ClearData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphSide {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOption {
    pub name: String,
    pub key: u32,
}

/// Messages sent by a UI context back to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromClientMessage {
    /// Reserved; the supervisor ignores it.
    SwitchGraph {
        side: GraphSide,
        #[serde(default)]
        options: Vec<GraphOption>,
    },
    SetEnabledMetrics { keys: Vec<MetricKey> },
    SetVisibility { visible: bool },
}
