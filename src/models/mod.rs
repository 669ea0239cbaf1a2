pub mod bar_chart;
pub mod chart;
pub mod layout;
pub mod object;

pub use chart::{ComponentDef, Dock, ScaleDef, VisualSettings};
pub use layout::{Cell, HyperCube, Layout};
pub use object::{ObjectDefinition, ObjectInfo, SortCriteria};
