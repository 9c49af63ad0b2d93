//! Instruction template sent to the language model.

/// Placeholder replaced by the user's prompt.
pub const USER_PROMPT_PLACEHOLDER: &str = "{{user_prompt}}";

/// Instructions asking for a single JSON document in the shape that
/// [`sdprompt_core::spec::parse_spec_response`] accepts.
pub const SYSTEM_TEMPLATE: &str = r#"You turn short image ideas into precise Stable Diffusion generation specs.

Analyse the request below and answer with exactly one JSON object, no prose:

{
  "status": {
    "success": true,
    "errors": []
  },
  "analysis": {
    "subject": { "primary": "main subject", "secondary": ["supporting elements"] },
    "style": { "primary": "dominant artistic style", "influences": ["optional"] },
    "technical": {
      "composition": "framing and layout",
      "lighting": "light sources and quality",
      "color": "palette and grading"
    },
    "mood": "overall atmosphere"
  },
  "generation": {
    "prompt": "detailed positive prompt with style and quality tags",
    "negative_prompt": "things to avoid",
    "parameters": {
      "width": 1024,
      "height": 1024,
      "cfg_scale": 7.0,
      "steps": 30,
      "seed": null
    }
  }
}

Rules:
- width and height between 512 and 1024, multiples of 64
- cfg_scale between 1.0 and 20.0
- steps between 10 and 150
- seed is null unless the request asks for a specific one
- prompt and negative_prompt are non-empty and under 10000 characters
- if the request cannot be fulfilled, set status.success to false and list
  the reasons in status.errors

Request:
{{user_prompt}}"#;

/// Render the template with `user_prompt` substituted.
pub fn render_template(user_prompt: &str) -> String {
    SYSTEM_TEMPLATE.replace(USER_PROMPT_PLACEHOLDER, user_prompt.trim())
}
