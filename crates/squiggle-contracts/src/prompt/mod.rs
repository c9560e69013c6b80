mod compose;
mod fence;

pub use compose::{compose, ComposedPrompt, ContentPart, GenerationMode, InlineImage};
pub use fence::strip_code_fence;
