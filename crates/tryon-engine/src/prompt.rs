use tryon_contracts::tryon::{Angle, QualityTier, SCENARIO_PRESETS};

/// Text-suppression clause every instruction carries. The remote model burns
/// captions and logos into results unless told otherwise.
pub const NO_TEXT_CLAUSE: &str = "NO TEXT, NO WORDS, NO LETTERS, NO SIGNATURES, NO LOGOS";

const STANDARD_SUFFIX: &str = "high-end fashion editorial photography, ultra-realistic, sharp focus, cinematic lighting, preserve original garment colors and textures, high fidelity, professional color grading";

const ENHANCED_SUFFIX: &str = "hyper-photorealistic, shot on a full-frame camera with an 85mm prime lens at f/1.8, soft key light with natural rim lighting, true-to-life skin texture and pores, visible fabric weave and stitching detail, preserve original garment colors and textures, professional color grading, 4K ultra high resolution output";

const FLAT_LAY_INSTRUCTION: &str = "Premium Flat Lay Photography: The original clothing item from the image must be perfectly FOLDED and ORGANIZED on a luxury bed with high-quality white linen. Soft studio lighting. Show only the clothing product, no people. ABSOLUTELY NO TEXT OR LETTERS ON THE IMAGE.";

pub fn angle_description(angle: Angle) -> &'static str {
    match angle {
        Angle::Front => "full front view facing the camera",
        Angle::Back => {
            "full back view showing the back of the clothing, person facing away from camera"
        }
        Angle::RightSide => {
            "right side profile view, person looking to the right side of the frame"
        }
        Angle::LeftSide => "left side profile view, person looking to the left side of the frame",
        Angle::Lowered => {
            "crouching or lowered fashion pose, person is sitting or bending low, showing outfit from lower angle"
        }
        Angle::Leaning => {
            "inclined forward dynamic pose, person leaning towards the camera for a high-fashion editorial look"
        }
    }
}

/// Description for a raw token; anything unrecognised gets the front view.
pub fn angle_description_for_token(token: &str) -> &'static str {
    angle_description(Angle::from_token(token).unwrap_or_default())
}

/// Scene text sent to the model. Non-blank custom text wins over the preset; with
/// neither, the first preset is used.
pub fn resolve_scenario(preset: Option<&str>, custom: Option<&str>) -> String {
    let pick = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    pick(custom)
        .or_else(|| pick(preset))
        .unwrap_or_else(|| SCENARIO_PRESETS[0].to_string())
}

pub fn quality_suffix(tier: QualityTier) -> String {
    let body = match tier {
        QualityTier::Standard => STANDARD_SUFFIX,
        QualityTier::Enhanced => ENHANCED_SUFFIX,
    };
    format!(", {body}, {NO_TEXT_CLAUSE}.")
}

pub fn try_on_prompt(scenario: &str, angle: Angle, tier: QualityTier) -> String {
    compose_try_on(scenario, angle_description(angle), tier)
}

pub fn try_on_prompt_for_token(scenario: &str, angle_token: &str, tier: QualityTier) -> String {
    compose_try_on(scenario, angle_description_for_token(angle_token), tier)
}

/// `scenario` is placed into the instruction as given.
fn compose_try_on(scenario: &str, angle_text: &str, tier: QualityTier) -> String {
    let mut prompt = format!(
        "Virtual Try-On Fashion Shoot: The person from the first image must be wearing the EXACT outfit from the second image. Position: {angle_text}. Face and body type must remain identical to original person. REPLACE original clothes entirely. Environment: {scenario}. Strictly no text, high fidelity textures"
    );
    prompt.push_str(&quality_suffix(tier));
    prompt
}

/// Fixed product-shot instruction; scenario and angle never apply.
pub fn flat_lay_prompt() -> String {
    let mut prompt = FLAT_LAY_INSTRUCTION.trim_end_matches('.').to_string();
    prompt.push_str(&quality_suffix(QualityTier::Standard));
    prompt
}
