use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declarative chart structure: named scales plus the components drawn
/// against them. Independent of the data it is later rendered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSettings {
    pub scales: BTreeMap<String, ScaleDef>,
    pub components: Vec<ComponentDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDef {
    pub data: DataRef,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invert: bool,
    /// Values the scale domain must always cover, e.g. `[0]` for bar baselines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<Extract>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extract {
    pub field: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, PropValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Constant(f64),
    Field { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dock {
    Left,
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComponentDef {
    Axis {
        dock: Dock,
        scale: String,
    },
    Box {
        key: String,
        data: DataRef,
        settings: BoxSettings,
    },
    Text {
        text: String,
        layout: TextLayout,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSettings {
    pub major: ScaleRef,
    pub minor: ScaleRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleRef {
    pub scale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLayout {
    pub dock: Dock,
}

impl VisualSettings {
    pub fn scale(&self, name: &str) -> Option<&ScaleDef> {
        self.scales.get(name)
    }

    /// Title text docked on the given side, if any.
    pub fn title_at(&self, side: Dock) -> Option<&str> {
        self.components.iter().find_map(|component| match component {
            ComponentDef::Text { text, layout } if layout.dock == side => Some(text.as_str()),
            _ => None,
        })
    }

    /// The first box (bar) component with its data and scale bindings.
    pub fn bars(&self) -> Option<(&DataRef, &BoxSettings)> {
        self.components.iter().find_map(|component| match component {
            ComponentDef::Box { data, settings, .. } => Some((data, settings)),
            _ => None,
        })
    }
}

impl ScaleDef {
    /// Field the scale reads from, whether referenced directly or extracted.
    pub fn field(&self) -> Option<&str> {
        self.data
            .field
            .as_deref()
            .or_else(|| self.data.extract.as_ref().map(|extract| extract.field.as_str()))
    }
}
