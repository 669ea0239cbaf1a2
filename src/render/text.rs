use anyhow::{anyhow, bail, Context, Result};

use crate::models::chart::{DataRef, PropValue};
use crate::models::{Dock, Layout, ScaleDef, VisualSettings};

use super::{ChartRenderer, RenderTarget};

const DEFAULT_WIDTH: usize = 40;
const BAR: char = '#';

/// Draws the box component as horizontal text bars: one line per category
/// of the major scale, bar length proportional to the minor scale.
#[derive(Debug, Clone)]
pub struct TextBarRenderer {
    width: usize,
}

impl TextBarRenderer {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }
}

impl Default for TextBarRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH)
    }
}

struct Bar {
    label: String,
    value: Option<f64>,
    text: String,
}

impl ChartRenderer for TextBarRenderer {
    fn render(
        &mut self,
        target: &RenderTarget,
        settings: &VisualSettings,
        layout: &Layout,
    ) -> Result<()> {
        let (data, bindings) = settings
            .bars()
            .context("visual settings define no box component")?;
        let major = scale(settings, &bindings.major.scale)?;
        let minor = scale(settings, &bindings.minor.scale)?;

        let category_field = extract_field(data)
            .or_else(|| major.field())
            .context("bars have no category field")?;
        let value_field = end_field(data)
            .or_else(|| minor.field())
            .context("bars have no value field")?;

        let category_column = layout
            .column_of(category_field)
            .with_context(|| format!("layout has no column '{category_field}'"))?;
        let value_column = layout
            .column_of(value_field)
            .with_context(|| format!("layout has no column '{value_field}'"))?;

        let bars: Vec<Bar> = layout
            .rows()
            .map(|row| -> Result<Bar> {
                let label = row
                    .get(category_column)
                    .map(|cell| cell.text.clone())
                    .ok_or_else(|| anyhow!("row is missing column {category_column}"))?;
                let cell = row
                    .get(value_column)
                    .ok_or_else(|| anyhow!("row is missing column {value_column}"))?;
                Ok(Bar {
                    label,
                    value: cell.num,
                    text: cell.text.clone(),
                })
            })
            .collect::<Result<_>>()?;
        if bars.is_empty() {
            bail!("layout has no rows to draw");
        }

        let (low, high) = domain(minor, &bars);
        let span = high - low;

        let category_title = settings.title_at(Dock::Bottom).unwrap_or(category_field);
        let value_title = settings.title_at(Dock::Left).unwrap_or(value_field);
        let label_width = bars
            .iter()
            .map(|bar| bar.label.chars().count())
            .chain(std::iter::once(category_title.chars().count()))
            .max()
            .unwrap_or_default();

        let mut lines = Vec::with_capacity(bars.len() + 3);
        lines.push(format!("{category_title:>label_width$} | {value_title}"));
        for bar in &bars {
            let length = match bar.value {
                Some(value) if span > 0.0 => {
                    (((value - low) / span) * self.width as f64).round().max(0.0) as usize
                }
                _ => 0,
            };
            let fill: String = std::iter::repeat(BAR).take(length.min(self.width)).collect();
            lines.push(format!(
                "{:>label_width$} | {fill:<width$} {}",
                bar.label,
                bar.text,
                width = self.width
            ));
        }
        lines.push(format!("{:>label_width$} +{}", "", "-".repeat(self.width + 1)));
        lines.push(format!(
            "{:>label_width$}  {:<half$}{:>rest$}",
            "",
            format_tick(low),
            format_tick(high),
            half = self.width / 2,
            rest = self.width - self.width / 2
        ));

        target.replace(lines);
        Ok(())
    }
}

fn scale<'a>(settings: &'a VisualSettings, name: &str) -> Result<&'a ScaleDef> {
    settings
        .scale(name)
        .with_context(|| format!("visual settings have no scale '{name}'"))
}

fn extract_field(data: &DataRef) -> Option<&str> {
    data.extract.as_ref().map(|extract| extract.field.as_str())
}

fn end_field(data: &DataRef) -> Option<&str> {
    data.extract
        .as_ref()
        .and_then(|extract| extract.props.get("end"))
        .and_then(|prop| match prop {
            PropValue::Field { field } => Some(field.as_str()),
            PropValue::Constant(_) => None,
        })
}

/// Value domain of the minor scale: data extent widened by `include`.
fn domain(scale: &ScaleDef, bars: &[Bar]) -> (f64, f64) {
    bars.iter()
        .filter_map(|bar| bar.value)
        .chain(scale.include.iter().copied())
        .fold(None, |extent: Option<(f64, f64)>, value| match extent {
            None => Some((value, value)),
            Some((low, high)) => Some((low.min(value), high.max(value))),
        })
        .unwrap_or((0.0, 0.0))
}

fn format_tick(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}
