//! Fixed inputs of the single bar chart: load script, object definition and
//! visual settings.

use std::collections::BTreeMap;

use super::chart::{
    BoxSettings, ComponentDef, DataRef, Dock, Extract, PropValue, ScaleDef, ScaleRef, TextLayout,
    VisualSettings,
};
use super::object::{
    DimensionDef, FetchWindow, FieldDef, HyperCubeDef, MeasureDef, MeasureExpr, ObjectDefinition,
    ObjectInfo, SortCriteria,
};

pub const LOAD_SCRIPT: &str = "Stars:
LOAD * INLINE 
[
Rating,Votes,
10,3404,
9,2234,
8,6243,
7,13785,
6,20325,
5,18046,
4,10179,
3,5844,
2,3244,
1,3208
];";

pub const DIMENSION_FIELD: &str = "Rating";
pub const MEASURE_FIELD: &str = "Votes";

pub fn object_definition() -> ObjectDefinition {
    ObjectDefinition {
        info: ObjectInfo {
            object_type: "measure".into(),
            id: "barChartExample".into(),
        },
        visualization: "my-picasso-barChart".into(),
        hyper_cube_def: HyperCubeDef {
            dimensions: vec![DimensionDef {
                labels: true,
                def: FieldDef {
                    field_defs: vec![DIMENSION_FIELD.into()],
                    sort_criterias: vec![SortCriteria {
                        sort_by_ascii: 1,
                        ..SortCriteria::default()
                    }],
                },
            }],
            measures: vec![MeasureDef {
                labels: true,
                def: MeasureExpr {
                    label: MEASURE_FIELD.into(),
                    expression: MEASURE_FIELD.into(),
                    auto_sort: true,
                },
            }],
            initial_data_fetch: vec![FetchWindow {
                top: 0,
                left: 0,
                height: 15,
                width: 2,
            }],
        },
    }
}

pub fn visual_settings() -> VisualSettings {
    let mut scales = BTreeMap::new();
    scales.insert(
        "y".to_string(),
        ScaleDef {
            data: DataRef {
                field: Some(MEASURE_FIELD.into()),
                extract: None,
            },
            invert: true,
            include: vec![0.0],
            padding: None,
        },
    );
    scales.insert(
        "t".to_string(),
        ScaleDef {
            data: DataRef {
                field: None,
                extract: Some(Extract {
                    field: DIMENSION_FIELD.into(),
                    props: BTreeMap::new(),
                }),
            },
            invert: false,
            include: Vec::new(),
            padding: Some(0.3),
        },
    );

    let mut bar_props = BTreeMap::new();
    bar_props.insert("start".to_string(), PropValue::Constant(0.0));
    bar_props.insert(
        "end".to_string(),
        PropValue::Field {
            field: MEASURE_FIELD.into(),
        },
    );

    VisualSettings {
        scales,
        components: vec![
            ComponentDef::Axis {
                dock: Dock::Left,
                scale: "y".into(),
            },
            ComponentDef::Axis {
                dock: Dock::Bottom,
                scale: "t".into(),
            },
            ComponentDef::Box {
                key: "bars".into(),
                data: DataRef {
                    field: None,
                    extract: Some(Extract {
                        field: DIMENSION_FIELD.into(),
                        props: bar_props,
                    }),
                },
                settings: BoxSettings {
                    major: ScaleRef { scale: "t".into() },
                    minor: ScaleRef { scale: "y".into() },
                },
            },
            ComponentDef::Text {
                text: "Rating Score".into(),
                layout: TextLayout { dock: Dock::Bottom },
            },
            ComponentDef::Text {
                text: "Number of Votes".into(),
                layout: TextLayout { dock: Dock::Left },
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn object_definition_uses_engine_wire_names() {
        let value = serde_json::to_value(object_definition()).unwrap();

        assert_eq!(value["qInfo"], json!({ "qType": "measure", "qId": "barChartExample" }));
        assert_eq!(
            value["qHyperCubeDef"]["qDimensions"][0]["qDef"],
            json!({ "qFieldDefs": ["Rating"], "qSortCriterias": [{ "qSortByAscii": 1 }] })
        );
        assert_eq!(
            value["qHyperCubeDef"]["qInitialDataFetch"][0],
            json!({ "qTop": 0, "qLeft": 0, "qHeight": 15, "qWidth": 2 })
        );
    }

    #[test]
    fn visual_settings_parse_from_chart_json() {
        let parsed: VisualSettings = serde_json::from_value(json!({
            "scales": {
                "y": { "data": { "field": "Votes" }, "invert": true, "include": [0] },
                "t": { "data": { "extract": { "field": "Rating" } }, "padding": 0.3 }
            },
            "components": [
                { "type": "axis", "dock": "left", "scale": "y" },
                { "type": "axis", "dock": "bottom", "scale": "t" },
                {
                    "key": "bars",
                    "type": "box",
                    "data": {
                        "extract": {
                            "field": "Rating",
                            "props": { "start": 0, "end": { "field": "Votes" } }
                        }
                    },
                    "settings": { "major": { "scale": "t" }, "minor": { "scale": "y" } }
                },
                { "type": "text", "text": "Rating Score", "layout": { "dock": "bottom" } },
                { "type": "text", "text": "Number of Votes", "layout": { "dock": "left" } }
            ]
        }))
        .unwrap();

        assert_eq!(parsed, visual_settings());
    }

    #[test]
    fn titles_are_found_by_dock() {
        let settings = visual_settings();
        assert_eq!(settings.title_at(Dock::Bottom), Some("Rating Score"));
        assert_eq!(settings.title_at(Dock::Left), Some("Number of Votes"));
        assert_eq!(settings.title_at(Dock::Top), None);
        assert_eq!(settings.scale("t").and_then(ScaleDef::field), Some("Rating"));
    }
}
