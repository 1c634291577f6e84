//! Command tags.

/// Generates sequential command tags (`A0000`, `A0001`, ...).
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u32,
    prefix: char,
}

impl TagGenerator {
    /// Creates a generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Returns the next tag.
    pub fn next_tag(&mut self) -> String {
        let tag = format!("{}{:04}", self.prefix, self.counter);
        self.counter = self.counter.wrapping_add(1);
        tag
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}
