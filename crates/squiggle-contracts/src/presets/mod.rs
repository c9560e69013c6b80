mod store;

use serde::{Deserialize, Serialize};

pub use store::PresetStore;

/// A visual-style preset. Owned by the surrounding shell; the core only
/// reads `prompt` as the system-instruction seed and never mutates one.
/// `icon` is an opaque identifier for whatever renders the picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub prompt: String,
    #[serde(default)]
    pub is_custom: bool,
}

const HUSKY_MASTER: &str = r#"Role: Elite CSS Motion Designer (Inspired by the "Husky" Masterpiece).
Objective: Create a top-tier organic character animation of [SUBJECT].
Rules:
1. **The Golden Standard**: Emulate the "Husky" CSS architecture.
2. **Sophisticated State Management**: Use multi-step keyframes (0, 10%, 25%, 50%, 75%, 100%) to give the character personality (blinking, breathing, tail wagging, ear twitching).
3. **Physics**: Limbs should have secondary motion (follow-through).
4. **Visual Polish**: Use semi-transparent overlays for fur/texture and gradients for depth.
5. **Responsiveness**: Use "vmin" units for all sizes to ensure perfect scaling."#;

const SQUIGGLE: &str = r#"Role: Master Creative Coder specializing in organic "Husky-style" CSS animations.
Objective: Create a complex, animated CSS illustration of [SUBJECT] using the "Squigglevision" technique.

Technical Blueprint (Follow strictly):
1. **The Canvas**: A .canvas wrapper with "animation: squiggly-anim 0.3s infinite;".
2. **SVG Filters**: Include the 5-part <svg> block (#squiggly-0 through #squiggly-4) with feTurbulence (baseFrequency="0.02") and feDisplacementMap.
3. **Recursive Nesting (The Tail/Tentacle Pattern)**: For flexible parts like tails or spines, use recursive nesting (div > div > div...). Animate the rotation of these nested segments with slight offsets to create fluid, whip-like motion.
4. **Hierarchical Rigging**: Use a deeply nested DOM. For example, Head contains Face, which contains Eyes and Mouth. Body contains Limbs.
5. **Joint Mechanics**: Set "transform-origin" strategically (e.g., bottom-center for a head, center-right for a tail segment).
6. **Pseudo-Element Mastery**: Use ::before and ::after extensively on every part to create complex shapes (ears, highlights, secondary fur/armor) without polluting the main DOM.
7. **Animation Easing**: Use "cubic-bezier(0.645, 0.045, 0.355, 1)" for all movement to ensure an organic, high-end feel.
8. **Color Palette**: Use CSS Variables (:root) for primary, secondary, light, and shadow colors.

Output: Provide ONLY the raw HTML/CSS starting with <!DOCTYPE html>."#;

const NEON: &str = r#"Role: Technical SFX Rigging Specialist.
Objective: Create a neon "Cybernetic Skeleton" of [SUBJECT].
Rules:
1. **Wireframe Aesthetic**: Dark background (#050505), 1px neon borders, and intense box-shadow glows.
2. **Skeletal Structure**: Every "bone" should be a nested div with a visible joint.
3. **Mechanical Kinematics**: Use linear or stepped timing for a "robotized" feel.
4. **Circuitry Detail**: Use ::before/::after to add "circuit nodes" at every joint.
5. **Scanning Effect**: Add a vertical scanning line using a pseudo-element on the main wrapper."#;

const CUTOUT: &str = r#"Role: Expert Digital Puppeteer & Paper Artist.
Objective: Create a "Paper Cutout" stop-motion animation of [SUBJECT].
Rules:
1. **Layered Depth**: Apply varying levels of drop-shadow (box-shadow: 2px 2px 8px rgba(0,0,0,0.4)) to every element to simulate stacked paper.
2. **Pin-Joints**: Use circular ::after elements at joints to look like brass fasteners.
3. **Stop-Motion Timing**: Use "steps(4)" or "steps(2)" for all animations to simulate low frame-rate puppetry.
4. **Recursive Parts**: Flexible parts should still use the recursive div-nesting method but with rigid, non-bending "paper" segments."#;

const BLUEPRINT: &str = r#"Role: Senior Industrial Concept Designer.
Objective: Create a technical "Engineering Blueprint" of [SUBJECT].
Rules:
1. **Styling**: Engineering blue background (#003366) with a subtle grid. White, 1px dashed/solid strokes.
2. **Annotation**: Use absolute positioned ::before elements to draw "leader lines" and small labels naming parts of the subject.
3. **Drafting Animation**: Parts should "vibrate" slightly or have "scanning" gradients pass through them.
4. **Measurement Lines**: Add technical dimension lines using pseudo-elements."#;

const RETRO: &str = r#"Role: 16-Bit Pixel Artist.
Objective: Create a "CRT-style" sprite animation of [SUBJECT].
Rules:
1. **Voxel/Pixel Build**: Construct the subject from many small squares or use heavy "border-radius: 0".
2. **CRT Effect**: A full-screen scanline overlay using a repeating linear-gradient.
3. **Limited Palette**: 16 colors maximum.
4. **Frame-by-Frame**: Use "steps(1)" timing only. No smooth transitions."#;

/// The shipped style catalog, in picker order.
pub fn builtin_presets() -> Vec<Preset> {
    let preset = |id: &str, name: &str, description: &str, icon: &str, prompt: &str| Preset {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        prompt: prompt.to_string(),
        is_custom: false,
    };

    vec![
        preset(
            "husky",
            "Organic Masterpiece",
            "Elite hierarchical character rigging.",
            "dog",
            HUSKY_MASTER,
        ),
        preset(
            "squiggle",
            "Squigglevision",
            "Hand-drawn wobbly animation style.",
            "wand",
            SQUIGGLE,
        ),
        preset(
            "neon",
            "Neon Wireframe",
            "Sci-fi skeletal structure visualizations.",
            "box",
            NEON,
        ),
        preset(
            "cutout",
            "Paper Cutout",
            "Layered stop-motion puppet aesthetic.",
            "scissors",
            CUTOUT,
        ),
        preset(
            "blueprint",
            "Blueprint Schematic",
            "Technical engineering drawing style.",
            "ruler",
            BLUEPRINT,
        ),
        preset(
            "retro",
            "Retro Pixel CRT",
            "Classic game console look and feel.",
            "monitor",
            RETRO,
        ),
    ]
}
