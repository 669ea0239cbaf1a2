use serde::{Deserialize, Serialize};

/// Generic object properties handed to the engine when creating a session
/// object. Field names follow the engine's `q`-prefixed wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    #[serde(rename = "qInfo")]
    pub info: ObjectInfo,
    #[serde(rename = "type")]
    pub visualization: String,
    #[serde(rename = "qHyperCubeDef")]
    pub hyper_cube_def: HyperCubeDef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectInfo {
    #[serde(rename = "qType")]
    pub object_type: String,
    #[serde(rename = "qId")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperCubeDef {
    #[serde(rename = "qDimensions", default)]
    pub dimensions: Vec<DimensionDef>,
    #[serde(rename = "qMeasures", default)]
    pub measures: Vec<MeasureDef>,
    #[serde(rename = "qInitialDataFetch", default)]
    pub initial_data_fetch: Vec<FetchWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionDef {
    #[serde(default)]
    pub labels: bool,
    #[serde(rename = "qDef")]
    pub def: FieldDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "qFieldDefs")]
    pub field_defs: Vec<String>,
    #[serde(rename = "qSortCriterias", default)]
    pub sort_criterias: Vec<SortCriteria>,
}

/// Sort direction per criterion: `1` ascending, `-1` descending, `0` unused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriteria {
    #[serde(rename = "qSortByAscii", default, skip_serializing_if = "is_zero")]
    pub sort_by_ascii: i8,
    #[serde(rename = "qSortByNumeric", default, skip_serializing_if = "is_zero")]
    pub sort_by_numeric: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureDef {
    #[serde(default)]
    pub labels: bool,
    #[serde(rename = "qDef")]
    pub def: MeasureExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureExpr {
    #[serde(rename = "qLabel")]
    pub label: String,
    #[serde(rename = "qDef")]
    pub expression: String,
    #[serde(rename = "autoSort", default)]
    pub auto_sort: bool,
}

/// Rectangle of the data matrix fetched together with the first layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    #[serde(rename = "qTop", default)]
    pub top: usize,
    #[serde(rename = "qLeft", default)]
    pub left: usize,
    #[serde(rename = "qHeight")]
    pub height: usize,
    #[serde(rename = "qWidth")]
    pub width: usize,
}

fn is_zero(value: &i8) -> bool {
    *value == 0
}
