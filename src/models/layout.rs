use serde::{Deserialize, Serialize};

use super::object::{FetchWindow, ObjectInfo};

/// Materialized snapshot of a model: resolved data pages plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(rename = "qInfo")]
    pub info: ObjectInfo,
    #[serde(rename = "qHyperCube")]
    pub hyper_cube: HyperCube,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperCube {
    #[serde(rename = "qSize")]
    pub size: Size,
    #[serde(rename = "qDimensionInfo")]
    pub dimension_info: Vec<DimensionInfo>,
    #[serde(rename = "qMeasureInfo")]
    pub measure_info: Vec<MeasureInfo>,
    #[serde(rename = "qDataPages")]
    pub data_pages: Vec<DataPage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    #[serde(rename = "qcx")]
    pub columns: usize,
    #[serde(rename = "qcy")]
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionInfo {
    #[serde(rename = "qFallbackTitle")]
    pub title: String,
    #[serde(rename = "qCardinal")]
    pub cardinal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureInfo {
    #[serde(rename = "qFallbackTitle")]
    pub title: String,
    #[serde(rename = "qMin")]
    pub min: Option<f64>,
    #[serde(rename = "qMax")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPage {
    #[serde(rename = "qArea")]
    pub area: FetchWindow,
    #[serde(rename = "qMatrix")]
    pub matrix: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "qText")]
    pub text: String,
    /// `None` when the cell has no numeric representation.
    #[serde(rename = "qNum")]
    pub num: Option<f64>,
    #[serde(rename = "qElemNumber")]
    pub elem_number: i64,
}

impl Layout {
    /// Number of data rows materialized across all fetched pages.
    pub fn row_count(&self) -> usize {
        self.hyper_cube
            .data_pages
            .iter()
            .map(|page| page.matrix.len())
            .sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.hyper_cube
            .data_pages
            .iter()
            .flat_map(|page| page.matrix.iter().map(Vec::as_slice))
    }

    /// Column index of a dimension or measure, matched by its title.
    pub fn column_of(&self, title: &str) -> Option<usize> {
        let cube = &self.hyper_cube;
        cube.dimension_info
            .iter()
            .position(|dim| dim.title == title)
            .or_else(|| {
                cube.measure_info
                    .iter()
                    .position(|measure| measure.title == title)
                    .map(|index| cube.dimension_info.len() + index)
            })
    }
}
