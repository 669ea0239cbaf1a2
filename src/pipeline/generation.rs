use std::fmt;

/// Identity of one produced stage value (or one connection handle).
///
/// Every stage records the generation of the input it was started for; a
/// result is applied only while that record still matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Monotonic generation source owned by the supervisor.
#[derive(Debug, Default)]
pub(crate) struct GenerationClock {
    last: u64,
}

impl GenerationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next generation, starting at `g1`.
    pub fn next(&mut self) -> Generation {
        self.last = self.last.wrapping_add(1);
        Generation(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_are_unique_and_increasing() {
        let mut clock = GenerationClock::new();
        let first = clock.next();
        let second = clock.next();
        assert_eq!(first.get(), 1);
        assert!(second > first);
        assert_eq!(second.to_string(), "g2");
    }
}
