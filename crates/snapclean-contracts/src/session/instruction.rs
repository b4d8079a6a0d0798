/// Quick-action directives offered by the presentation layer. Each routes
/// through the same edit path as free-form text.
pub const PRESET_INSTRUCTIONS: &[&str] = &[
    "Remove background",
    "Add white studio background",
    "Fix lighting and shadows",
    "Enhance product colors",
    "Add a dramatic shadow",
    "Add retro film filter",
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstructionSource {
    Preset,
    Freeform,
}

/// A natural-language edit directive. Preset and free-form instructions are
/// one type; only the provenance differs.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    text: String,
    source: InstructionSource,
}

impl Instruction {
    /// Trims and validates free-form text. Empty or whitespace-only input
    /// yields `None` so callers never dispatch a blank directive.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            text: trimmed.to_string(),
            source: InstructionSource::Freeform,
        })
    }

    /// Looks up a preset by 1-based index as shown in the `/presets` listing.
    pub fn preset(index: usize) -> Option<Self> {
        let text = *PRESET_INSTRUCTIONS.get(index.checked_sub(1)?)?;
        Some(Self {
            text: text.to_string(),
            source: InstructionSource::Preset,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> InstructionSource {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::{Instruction, InstructionSource, PRESET_INSTRUCTIONS};

    #[test]
    fn parse_trims_and_rejects_blank_text() {
        assert!(Instruction::parse("").is_none());
        assert!(Instruction::parse("   \t  ").is_none());

        let parsed = Instruction::parse("  Remove background  ").unwrap();
        assert_eq!(parsed.text(), "Remove background");
        assert_eq!(parsed.source(), InstructionSource::Freeform);
    }

    #[test]
    fn preset_lookup_is_one_based() {
        let first = Instruction::preset(1).unwrap();
        assert_eq!(first.text(), PRESET_INSTRUCTIONS[0]);
        assert_eq!(first.source(), InstructionSource::Preset);

        let last = Instruction::preset(PRESET_INSTRUCTIONS.len()).unwrap();
        assert_eq!(last.text(), *PRESET_INSTRUCTIONS.last().unwrap());

        assert!(Instruction::preset(0).is_none());
        assert!(Instruction::preset(PRESET_INSTRUCTIONS.len() + 1).is_none());
    }
}
