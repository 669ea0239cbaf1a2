pub mod text;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::models::{Layout, VisualSettings};

pub use text::TextBarRenderer;

/// Paints a layout into a target using declarative visual settings.
///
/// Called again with every new layout; implementations must replace what
/// they drew before rather than draw on top of it.
pub trait ChartRenderer: Send {
    fn render(
        &mut self,
        target: &RenderTarget,
        settings: &VisualSettings,
        layout: &Layout,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
struct Surface {
    lines: Vec<String>,
    draws: u64,
}

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Host-owned drawing surface. Clones share the same surface.
#[derive(Debug, Clone)]
pub struct RenderTarget {
    id: u64,
    surface: Arc<Mutex<Surface>>,
}

impl RenderTarget {
    pub fn new() -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            surface: Arc::new(Mutex::new(Surface::default())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn surface(&self) -> MutexGuard<'_, Surface> {
        self.surface.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the whole surface content.
    pub fn replace(&self, lines: Vec<String>) {
        let mut surface = self.surface();
        surface.lines = lines;
        surface.draws += 1;
    }

    /// Empties the surface without counting a draw.
    pub fn clear(&self) {
        self.surface().lines.clear();
    }

    pub fn lines(&self) -> Vec<String> {
        self.surface().lines.clone()
    }

    pub fn text(&self) -> String {
        self.surface().lines.join("\n")
    }

    pub fn draw_count(&self) -> u64 {
        self.surface().draws
    }
}

impl Default for RenderTarget {
    fn default() -> Self {
        Self::new()
    }
}
