//! Straight-table hypercube evaluation over loaded inline tables.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::layout::{DataPage, DimensionInfo, HyperCube, MeasureInfo, Size};
use crate::models::object::{FetchWindow, HyperCubeDef, SortCriteria};
use crate::models::Cell;

use super::script::{Table, Value};
use super::EngineError;

const METHOD: &str = "GetLayout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Only,
}

#[derive(Debug, Clone, PartialEq)]
struct MeasureExpression {
    aggregation: Aggregation,
    field: String,
}

impl MeasureExpression {
    /// Accepts `Field`, `=Field` or `Agg(Field)`; a bare field behaves as `Only`.
    fn parse(expression: &str) -> Result<Self, EngineError> {
        let expression = expression.trim();
        let expression = expression.strip_prefix('=').unwrap_or(expression).trim();

        let Some((name, rest)) = expression.split_once('(') else {
            return Ok(Self {
                aggregation: Aggregation::Only,
                field: unquote(expression).to_string(),
            });
        };
        let field = rest
            .trim()
            .strip_suffix(')')
            .ok_or_else(|| EngineError::rejected(METHOD, format!("unbalanced expression '{expression}'")))?;
        let aggregation = match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Aggregation::Sum,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "count" => Aggregation::Count,
            "only" => Aggregation::Only,
            other => {
                return Err(EngineError::rejected(
                    METHOD,
                    format!("unsupported aggregation '{other}'"),
                ))
            }
        };
        Ok(Self {
            aggregation,
            field: unquote(field.trim()).to_string(),
        })
    }

    fn evaluate<'a>(&self, values: impl Iterator<Item = &'a Value>) -> Option<f64> {
        let values: Vec<&Value> = values.collect();
        if self.aggregation == Aggregation::Count {
            return Some(values.len() as f64);
        }
        let nums: Vec<f64> = values.iter().filter_map(|value| value.num).collect();
        if nums.is_empty() {
            return None;
        }
        match self.aggregation {
            Aggregation::Sum => Some(nums.iter().sum()),
            Aggregation::Avg => Some(nums.iter().sum::<f64>() / nums.len() as f64),
            Aggregation::Min => nums.iter().copied().reduce(f64::min),
            Aggregation::Max => nums.iter().copied().reduce(f64::max),
            Aggregation::Only => {
                let first = nums[0];
                nums.iter().all(|num| *num == first).then_some(first)
            }
            Aggregation::Count => unreachable!("handled above"),
        }
    }
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(text)
}

struct DimensionColumn {
    field: String,
    column: usize,
    sort: Option<SortCriteria>,
    /// Distinct values in load order; the index is the element number.
    symbols: Vec<Value>,
}

struct Group {
    elements: Vec<usize>,
    rows: Vec<usize>,
}

/// Evaluates a hypercube definition against the loaded tables.
///
/// All referenced fields must live in one table; the in-memory engine has no
/// associative model across tables.
pub fn evaluate(def: &HyperCubeDef, tables: &[Table]) -> Result<HyperCube, EngineError> {
    let measures = def
        .measures
        .iter()
        .map(|measure| MeasureExpression::parse(&measure.def.expression))
        .collect::<Result<Vec<_>, _>>()?;

    let mut fields: Vec<&str> = def
        .dimensions
        .iter()
        .map(|dim| {
            dim.def.field_defs.first().map(String::as_str).ok_or_else(|| {
                EngineError::rejected(METHOD, "dimension without field definition")
            })
        })
        .collect::<Result<_, _>>()?;
    fields.extend(measures.iter().map(|measure| measure.field.as_str()));

    let table = match fields.first() {
        Some(first) => tables
            .iter()
            .find(|table| table.field_index(first).is_some())
            .ok_or_else(|| EngineError::rejected(METHOD, format!("field '{first}' not found")))?,
        None => return Err(EngineError::rejected(METHOD, "hypercube has no columns")),
    };
    for field in &fields {
        if table.field_index(field).is_none() {
            return Err(EngineError::rejected(
                METHOD,
                format!("field '{field}' not found in table '{}'", table.name),
            ));
        }
    }

    let dimensions: Vec<DimensionColumn> = def
        .dimensions
        .iter()
        .zip(&fields)
        .map(|(dim, field)| {
            let column = table.field_index(field).unwrap_or_default();
            let mut symbols: Vec<Value> = Vec::new();
            for row in &table.rows {
                if !symbols.iter().any(|symbol| symbol.text == row[column].text) {
                    symbols.push(row[column].clone());
                }
            }
            DimensionColumn {
                field: field.to_string(),
                column,
                sort: dim.def.sort_criterias.first().copied(),
                symbols,
            }
        })
        .collect();

    let mut groups = group_rows(table, &dimensions);
    groups.sort_by(|a, b| compare_groups(a, b, &dimensions));

    let measure_columns: Vec<usize> = measures
        .iter()
        .map(|measure| table.field_index(&measure.field).unwrap_or_default())
        .collect();

    let mut matrix: Vec<Vec<Cell>> = Vec::with_capacity(groups.len());
    let mut measure_values: Vec<Vec<Option<f64>>> = vec![Vec::new(); measures.len()];
    for group in &groups {
        let mut row: Vec<Cell> = group
            .elements
            .iter()
            .zip(&dimensions)
            .map(|(element, dim)| Cell {
                text: dim.symbols[*element].text.clone(),
                num: dim.symbols[*element].num,
                elem_number: *element as i64,
            })
            .collect();
        for (index, (measure, column)) in measures.iter().zip(&measure_columns).enumerate() {
            let value = measure.evaluate(group.rows.iter().map(|row| &table.rows[*row][*column]));
            measure_values[index].push(value);
            row.push(measure_cell(value));
        }
        matrix.push(row);
    }

    let size = Size {
        columns: dimensions.len() + measures.len(),
        rows: matrix.len(),
    };

    let dimension_info = dimensions
        .iter()
        .map(|dim| DimensionInfo {
            title: dim.field.clone(),
            cardinal: dim.symbols.len(),
        })
        .collect();
    let measure_info = def
        .measures
        .iter()
        .zip(&measure_values)
        .map(|(measure, values)| {
            let nums = values.iter().flatten().copied();
            MeasureInfo {
                title: if measure.def.label.is_empty() {
                    measure.def.expression.clone()
                } else {
                    measure.def.label.clone()
                },
                min: nums.clone().reduce(f64::min),
                max: nums.reduce(f64::max),
            }
        })
        .collect();

    let data_pages = def
        .initial_data_fetch
        .iter()
        .map(|window| fetch_page(&matrix, size, *window))
        .collect();

    Ok(HyperCube {
        size,
        dimension_info,
        measure_info,
        data_pages,
    })
}

fn group_rows(table: &Table, dimensions: &[DimensionColumn]) -> Vec<Group> {
    if dimensions.is_empty() {
        return vec![Group {
            elements: Vec::new(),
            rows: (0..table.rows.len()).collect(),
        }];
    }

    let mut index: HashMap<Vec<usize>, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for (row_index, row) in table.rows.iter().enumerate() {
        let elements: Vec<usize> = dimensions
            .iter()
            .map(|dim| {
                dim.symbols
                    .iter()
                    .position(|symbol| symbol.text == row[dim.column].text)
                    .unwrap_or_default()
            })
            .collect();
        match index.get(&elements) {
            Some(group) => groups[*group].rows.push(row_index),
            None => {
                index.insert(elements.clone(), groups.len());
                groups.push(Group {
                    elements,
                    rows: vec![row_index],
                });
            }
        }
    }
    groups
}

fn compare_groups(a: &Group, b: &Group, dimensions: &[DimensionColumn]) -> Ordering {
    for ((left, right), dim) in a.elements.iter().zip(&b.elements).zip(dimensions) {
        let lhs = &dim.symbols[*left];
        let rhs = &dim.symbols[*right];
        let ordering = match dim.sort {
            Some(sort) if sort.sort_by_numeric != 0 => {
                let ordering = compare_numeric(lhs, rhs);
                if sort.sort_by_numeric < 0 {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
            Some(sort) if sort.sort_by_ascii != 0 => {
                let ordering = lhs.text.cmp(&rhs.text);
                if sort.sort_by_ascii < 0 {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
            _ => left.cmp(right),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Numbers before text, text in load order as a tie-break.
fn compare_numeric(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs.num, rhs.num) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn measure_cell(value: Option<f64>) -> Cell {
    match value {
        Some(num) => Cell {
            text: format_number(num),
            num: Some(num),
            elem_number: 0,
        },
        None => Cell {
            text: "-".into(),
            num: None,
            elem_number: 0,
        },
    }
}

fn format_number(num: f64) -> String {
    if num.fract() == 0.0 && num.abs() < 1e15 {
        format!("{num:.0}")
    } else {
        format!("{num}")
    }
}

fn fetch_page(matrix: &[Vec<Cell>], size: Size, window: FetchWindow) -> DataPage {
    let top = window.top.min(size.rows);
    let bottom = window.top.saturating_add(window.height).min(size.rows);
    let left = window.left.min(size.columns);
    let right = window.left.saturating_add(window.width).min(size.columns);

    DataPage {
        area: FetchWindow {
            top,
            left,
            height: bottom - top,
            width: right - left,
        },
        matrix: matrix[top..bottom]
            .iter()
            .map(|row| row[left..right].to_vec())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::script::parse_script;
    use crate::models::bar_chart::{object_definition, LOAD_SCRIPT};
    use pretty_assertions::assert_eq;

    fn texts(cube: &HyperCube, column: usize) -> Vec<String> {
        cube.data_pages[0]
            .matrix
            .iter()
            .map(|row| row[column].text.clone())
            .collect()
    }

    #[test]
    fn bar_chart_cube_has_one_row_per_rating() {
        let tables = parse_script(LOAD_SCRIPT).unwrap();
        let cube = evaluate(&object_definition().hyper_cube_def, &tables).unwrap();

        assert_eq!(cube.size, Size { columns: 2, rows: 10 });
        assert_eq!(cube.data_pages[0].matrix.len(), 10);
        assert_eq!(
            texts(&cube, 0),
            vec!["1", "10", "2", "3", "4", "5", "6", "7", "8", "9"]
        );
        assert_eq!(cube.data_pages[0].matrix[1][1].num, Some(3404.0));
        assert_eq!(cube.measure_info[0].title, "Votes");
        assert_eq!(cube.measure_info[0].min, Some(2234.0));
        assert_eq!(cube.measure_info[0].max, Some(20325.0));
        assert_eq!(cube.dimension_info[0].cardinal, 10);
    }

    #[test]
    fn aggregations_group_repeated_values() {
        let tables = parse_script("T:\nLOAD * INLINE [\nK,V\na,1\nb,2\na,3\n];").unwrap();
        let mut def = object_definition().hyper_cube_def;
        def.dimensions[0].def.field_defs = vec!["K".into()];
        def.measures[0].def.expression = "Sum(V)".into();

        let cube = evaluate(&def, &tables).unwrap();
        assert_eq!(texts(&cube, 0), vec!["a", "b"]);
        assert_eq!(texts(&cube, 1), vec!["4", "2"]);

        def.measures[0].def.expression = "V".into();
        let cube = evaluate(&def, &tables).unwrap();
        assert_eq!(texts(&cube, 1), vec!["-", "2"]);
    }

    #[test]
    fn numeric_descending_sort_and_fetch_window() {
        let tables = parse_script(LOAD_SCRIPT).unwrap();
        let mut def = object_definition().hyper_cube_def;
        def.dimensions[0].def.sort_criterias = vec![SortCriteria {
            sort_by_numeric: -1,
            ..SortCriteria::default()
        }];
        def.initial_data_fetch[0].height = 3;
        def.initial_data_fetch[0].width = 1;

        let cube = evaluate(&def, &tables).unwrap();
        let page = &cube.data_pages[0];
        assert_eq!(page.area.height, 3);
        assert_eq!(page.area.width, 1);
        assert_eq!(texts(&cube, 0), vec!["10", "9", "8"]);
        assert_eq!(cube.size.rows, 10);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let tables = parse_script(LOAD_SCRIPT).unwrap();
        let mut def = object_definition().hyper_cube_def;
        def.measures[0].def.expression = "Sum(Stars)".into();

        let err = evaluate(&def, &tables).unwrap_err();
        assert!(matches!(err, EngineError::Rejected { method: "GetLayout", .. }));
    }
}
