//! Two-stage remote generation: prompt synthesis, then image synthesis.

use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{info, warn};

use crate::age::{domain_in_english, parse_age_months, AgeCategory};
use crate::error::GenerationError;
use crate::llm::{CompletionRequest, ImageGenerator, ImageRequest, TextGenerator};

/// Leading bytes of every PNG file.
pub const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

const PROMPT_MAX_TOKENS: usize = 300;
const PROMPT_TEMPERATURE: f32 = 0.7;

/// Model selectors and request shape for the two calls.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Language model used for prompt synthesis.
    pub prompt_model: String,
    /// Image model.
    pub image_model: String,
    /// Target resolution.
    pub image_size: String,
    /// Quality tier.
    pub image_quality: String,
    /// Sleep after each remote call completes.
    pub call_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prompt_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            image_quality: "hd".to_string(),
            call_delay: Duration::from_millis(1500),
        }
    }
}

/// Drives the text and image capabilities for one question at a time.
pub struct GenerationPipeline<T, I> {
    text: T,
    image: I,
    settings: PipelineSettings,
}

impl<T: TextGenerator, I: ImageGenerator> GenerationPipeline<T, I> {
    /// Wires the capabilities together.
    pub fn new(text: T, image: I, settings: PipelineSettings) -> Self {
        Self {
            text,
            image,
            settings,
        }
    }

    #[cfg(test)]
    pub(crate) fn text(&self) -> &T {
        &self.text
    }

    #[cfg(test)]
    pub(crate) fn image(&self) -> &I {
        &self.image
    }

    /// Runs both stages and returns the decoded image bytes.
    pub fn generate(
        &self,
        question_text: &str,
        age: &str,
        domain: &str,
        label: &str,
    ) -> Result<Vec<u8>, GenerationError> {
        info!(question_id = label, model = %self.settings.prompt_model, "generating prompt");
        let prompt = self.synthesize_prompt(question_text, age, domain)?;
        info!(question_id = label, prompt = %preview(&prompt, 100), "prompt ready");

        info!(question_id = label, model = %self.settings.image_model, "generating image");
        let bytes = self.synthesize_image(&prompt)?;
        if !bytes.starts_with(PNG_SIGNATURE) {
            warn!(
                question_id = label,
                "image data does not have a PNG header, saving anyway"
            );
        }
        Ok(bytes)
    }

    /// Asks the language model for one optimized image description.
    pub fn synthesize_prompt(
        &self,
        question_text: &str,
        age: &str,
        domain: &str,
    ) -> Result<String, GenerationError> {
        let system = prompt_instruction(age, domain);
        let user = format!(
            "Create an image prompt for this ASQ-3 question ({age}, {domain}): {question_text}"
        );
        let request = CompletionRequest {
            model: &self.settings.prompt_model,
            system: &system,
            user: &user,
            max_tokens: PROMPT_MAX_TOKENS,
            temperature: PROMPT_TEMPERATURE,
        };
        let reply = self.text.complete(&request);
        self.pace();
        let reply = reply.map_err(GenerationError::PromptRequest)?;
        match reply.map(|text| text.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(GenerationError::EmptyPrompt),
        }
    }

    /// Asks the image model for one image and decodes its payload.
    pub fn synthesize_image(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        let request = ImageRequest {
            model: &self.settings.image_model,
            prompt,
            size: &self.settings.image_size,
            quality: &self.settings.image_quality,
        };
        let reply = self.image.generate(&request);
        self.pace();
        let payload = reply
            .map_err(GenerationError::ImageRequest)?
            .filter(|payload| !payload.trim().is_empty())
            .ok_or(GenerationError::MissingImageData)?;
        let compact: String = payload.split_ascii_whitespace().collect();
        Ok(STANDARD.decode(compact)?)
    }

    fn pace(&self) {
        if !self.settings.call_delay.is_zero() {
            thread::sleep(self.settings.call_delay);
        }
    }
}

/// System instruction framing the illustration for the subject's age and domain.
pub fn prompt_instruction(age: &str, domain: &str) -> String {
    let months = parse_age_months(age);
    let child_term = AgeCategory::from_months(months);
    let domain_en = domain_in_english(domain);
    format!(
        "You are an expert at creating image generation prompts for child development illustrations. \
         Create a child-friendly, colorful cartoon illustration prompt based on the given ASQ-3 screening question. \
         The child in the image should be depicted as a {child_term} (around {months} months old). \
         The activity relates to {domain_en}. \
         Important guidelines:\n\
         - No text in the image\n\
         - Warm, friendly, educational style\n\
         - Bright, appealing colors suitable for a parenting app\n\
         - Show the child performing or attempting the described activity\n\
         - Safe, nurturing environment\n\
         - Simple, clear composition\n\
         Return ONLY the image prompt, nothing else."
    )
}

/// First `limit` characters of `text`, with an ellipsis when truncated.
pub fn preview(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::RefCell;

    struct ScriptedText(RefCell<Vec<anyhow::Result<Option<String>>>>, RefCell<Vec<String>>);

    impl TextGenerator for ScriptedText {
        fn complete(&self, request: &CompletionRequest<'_>) -> anyhow::Result<Option<String>> {
            self.1.borrow_mut().push(request.system.to_string());
            self.0.borrow_mut().remove(0)
        }
    }

    struct ScriptedImage(RefCell<Vec<anyhow::Result<Option<String>>>>);

    impl ImageGenerator for ScriptedImage {
        fn generate(&self, _request: &ImageRequest<'_>) -> anyhow::Result<Option<String>> {
            self.0.borrow_mut().remove(0)
        }
    }

    fn pipeline(
        text: Vec<anyhow::Result<Option<String>>>,
        image: Vec<anyhow::Result<Option<String>>>,
    ) -> GenerationPipeline<ScriptedText, ScriptedImage> {
        let settings = PipelineSettings {
            call_delay: Duration::ZERO,
            ..PipelineSettings::default()
        };
        GenerationPipeline::new(
            ScriptedText(RefCell::new(text), RefCell::new(Vec::new())),
            ScriptedImage(RefCell::new(image)),
            settings,
        )
    }

    #[test]
    fn decodes_png_payload() {
        let png = [PNG_SIGNATURE.as_slice(), b"rest".as_slice()].concat();
        let p = pipeline(
            vec![Ok(Some("  a baby smiling  ".into()))],
            vec![Ok(Some(STANDARD.encode(&png)))],
        );
        let bytes = p.generate("Tersenyum?", "2 Bulan", "Komunikasi", "id").unwrap();
        assert_eq!(bytes, png);
    }

    #[test]
    fn line_wrapped_payload_decodes() {
        let png = [PNG_SIGNATURE.as_slice(), [7u8; 120].as_slice()].concat();
        let encoded = STANDARD.encode(&png);
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));
        let p = pipeline(vec![], vec![Ok(Some(format!("{wrapped}\n")))]);
        assert_eq!(p.synthesize_image("x").unwrap(), png);
    }

    #[test]
    fn non_png_bytes_are_still_returned() {
        let p = pipeline(
            vec![Ok(Some("prompt".into()))],
            vec![Ok(Some(STANDARD.encode(b"GIF89a")))],
        );
        let bytes = p.generate("q", "2 Bulan", "Komunikasi", "id").unwrap();
        assert_eq!(bytes, b"GIF89a");
    }

    #[test]
    fn empty_prompt_is_classified() {
        let p = pipeline(vec![Ok(Some("   ".into()))], vec![]);
        assert!(matches!(
            p.synthesize_prompt("q", "2 Bulan", "Komunikasi"),
            Err(GenerationError::EmptyPrompt)
        ));
        let p = pipeline(vec![Ok(None)], vec![]);
        assert!(matches!(
            p.synthesize_prompt("q", "2 Bulan", "Komunikasi"),
            Err(GenerationError::EmptyPrompt)
        ));
    }

    #[test]
    fn capability_failures_are_classified() {
        let p = pipeline(vec![Err(anyhow!("503"))], vec![]);
        assert!(matches!(
            p.synthesize_prompt("q", "2 Bulan", "Komunikasi"),
            Err(GenerationError::PromptRequest(_))
        ));
        let p = pipeline(vec![], vec![Err(anyhow!("timeout")), Ok(None), Ok(Some("@@@".into()))]);
        assert!(matches!(
            p.synthesize_image("x"),
            Err(GenerationError::ImageRequest(_))
        ));
        assert!(matches!(
            p.synthesize_image("x"),
            Err(GenerationError::MissingImageData)
        ));
        assert!(matches!(p.synthesize_image("x"), Err(GenerationError::Decode(_))));
    }

    #[test]
    fn instruction_frames_age_and_domain() {
        let text = prompt_instruction("14 Bulan", "Motorik Kasar");
        assert!(text.contains("depicted as a toddler (around 14 months old)"));
        assert!(text.contains("relates to Gross motor skills"));
        assert!(text.contains("No text in the image"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
        assert_eq!(preview("ééé", 2), "éé...");
    }
}
