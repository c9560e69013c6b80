use serde::{Deserialize, Serialize};

/// Fixed requirements appended to every system instruction, fresh or not.
const TECHNICAL_REQUIREMENTS: &str = "CRITICAL TECHNICAL REQUIREMENTS:
- ALWAYS use hierarchical DOM nesting (Head > Face > Eye).
- For flexible parts, use recursive <div> nesting (Tail > Tail > Tail) to create jointed kinematic chains.
- Leverage ::before and ::after pseudo-elements for detail.
- Use \"transform-origin\" correctly at every joint.
- Use \"cubic-bezier(0.645, 0.045, 0.355, 1)\" for fluid, organic character movement.
- Use \"vmin\" units for responsiveness.
- Return ONLY valid, single-file HTML code.";

/// Prepended when an existing artifact is being surgically updated.
const ITERATION_CLAUSE: &str = "ITERATION MODE ENABLED:
You are performing a surgical update to an existing animation.
1. DO NOT redesign the character or core aesthetic.
2. PRESERVE the existing DOM structure and CSS variable names where possible.
3. ONLY modify the specific CSS properties or keyframes needed to address the critique provided in the user prompt.
4. Focus on fixing timing, transform-origins, or layering issues without breaking the original design.";

/// Whether a request designs from scratch or surgically edits an existing
/// artifact. Discriminated solely by the presence of original code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Fresh,
    Iteration,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Fresh => "fresh",
            GenerationMode::Iteration => "iteration",
        }
    }
}

/// Inline image payload: mime type plus base64 data with any data-URL
/// prefix already removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    /// Accepts either raw base64 or a `data:<mime>;base64,<payload>` URL.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        let raw: String = data.into();
        let data = raw
            .split_once(',')
            .map(|(_, tail)| tail.to_string())
            .unwrap_or(raw);
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Image(InlineImage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
    pub mode: GenerationMode,
}

impl ComposedPrompt {
    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, ContentPart::Image(_)))
    }
}

/// Build the instruction payload for a generation call. Pure: the output
/// is a function of the inputs alone, and `original_code` presence is the
/// only thing that switches between fresh-design and iteration framing.
pub fn compose(
    base_instruction: &str,
    user_prompt: &str,
    original_code: Option<&str>,
    visual_context: Option<&InlineImage>,
) -> ComposedPrompt {
    let mode = match original_code {
        Some(_) => GenerationMode::Iteration,
        None => GenerationMode::Fresh,
    };

    let system_instruction = match mode {
        GenerationMode::Fresh => {
            format!("{base_instruction}\n\n{TECHNICAL_REQUIREMENTS}")
        }
        GenerationMode::Iteration => {
            format!("{base_instruction}\n\n{ITERATION_CLAUSE}\n\n{TECHNICAL_REQUIREMENTS}")
        }
    };

    let task_text = match original_code {
        Some(code) => format!(
            "Original Code to Optimize:\n{code}\n\nTask: Surgically improve this animation based on these instructions: {user_prompt}"
        ),
        None => format!("Design and code a high-quality CSS animation of: {user_prompt}"),
    };

    let mut parts = vec![ContentPart::Text(task_text)];
    if let Some(image) = visual_context {
        parts.push(ContentPart::Image(image.clone()));
    }

    ComposedPrompt {
        system_instruction,
        parts,
        mode,
    }
}
