//! Prompt builders for the four model calls.

/// Prompt for the labeler's one-sentence description.
pub const DESCRIBE_PROMPT: &str = "Describe this photo in one short sentence: the subject, \
the setting, and anything visually distinctive. Return only the sentence, no preamble.";

/// Prompt for the same-take comparison.
pub const SAME_TAKE_PROMPT: &str = r#"You are given two photographs. Decide whether they are \
takes of the same scene: the same subject captured moments apart, where only pose, exposure, \
or framing differs slightly. Different scenes, different subjects, or different locations are \
NOT the same take.

Return ONLY a JSON object with this schema:
{"same_take": true}
"#;

/// Build the quality-comparison prompt for a pair of images.
pub fn compare_images_prompt() -> String {
    compare_prompt("photographs", "composition, focus, exposure, subject expression, and timing")
}

/// Build the quality-comparison prompt for a pair of video clips.
pub fn compare_videos_prompt() -> String {
    compare_prompt(
        "short video clips",
        "stability, framing, pacing, subject clarity, and moment captured",
    )
}

fn compare_prompt(noun: &str, criteria: &str) -> String {
    format!(
        r#"You are a professional photo editor reviewing two {noun} of the same scene.
Judge which one is the stronger keeper, weighing {criteria}.

Return ONLY a JSON object with this schema:
{{
  "winner": 1,
  "reasoning": "One concise sentence explaining the choice",
  "confidence": 0.8
}}

"winner" is 1 for the first item shown, 2 for the second. "confidence" is a number
between 0 and 1.
"#
    )
}

/// Prompt for image enhancement.
pub const ENHANCE_PROMPT: &str = "Enhance this photograph like a professional retoucher: \
correct exposure and white balance, recover shadow detail, and gently sharpen. Keep the \
content, framing, and people exactly as they are. Return the enhanced image.";

/// Build the bucket-naming prompt from a few member labels.
pub fn name_bucket_prompt(labels: &[String]) -> String {
    let listed = labels
        .iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"These descriptions all belong to near-duplicate takes of one scene:
{listed}

Give the group a 2-4 word name a photographer would use in a gallery sidebar.

Return ONLY a JSON object with this schema:
{{"name": "Sunset over pier"}}
"#
    )
}
