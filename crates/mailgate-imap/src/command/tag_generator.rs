//! IMAP command tag generator.
//!
//! Tags are used to match commands with their responses.

/// Tag generator for a single connection.
///
/// Generates sequential tags in the format "A0001", "A0002", etc. A login
/// check sends a handful of commands, so the counter simply wraps.
#[derive(Debug, Clone)]
pub struct TagGenerator {
    counter: u16,
    prefix: char,
}

impl TagGenerator {
    /// Creates a new tag generator with the given prefix.
    #[must_use]
    pub const fn new(prefix: char) -> Self {
        Self { counter: 0, prefix }
    }

    /// Generates the next tag.
    pub fn next_tag(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("{}{:04}", self.prefix, self.counter)
    }
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new('A')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_generation() {
        let mut generator = TagGenerator::default();
        assert_eq!(generator.next_tag(), "A0001");
        assert_eq!(generator.next_tag(), "A0002");
        assert_eq!(generator.next_tag(), "A0003");
    }

    #[test]
    fn test_custom_prefix() {
        let mut generator = TagGenerator::new('T');
        assert_eq!(generator.next_tag(), "T0001");
    }

    #[test]
    fn test_wraps_instead_of_panicking() {
        let mut generator = TagGenerator {
            counter: u16::MAX,
            prefix: 'A',
        };
        assert_eq!(generator.next_tag(), "A0000");
    }
}
