pub mod history;
pub mod instruction;
pub mod processing;

pub use history::{EditHistory, EditedImage, ImageBytes, ImageRef};
pub use instruction::{Instruction, InstructionSource, PRESET_INSTRUCTIONS};
pub use processing::{ProcessingState, SessionPhase, PROCESSING_MESSAGE};
