use rmcp::model::{CallToolResult, Content};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{OcrMcpError, Result};
use crate::image::ImageResolver;
use crate::ocr::{OcrProvider, OcrRequest, RecognitionLevel, DEFAULT_LANGUAGE};

pub const TOOL_NAME: &str = "ocr_extract_text";

/// Arguments of an `ocr_extract_text` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OcrExtractArgs {
    /// Local file path, http(s) URL, or data:image/...;base64 URL
    pub image: String,
    /// BCP-47 language tags in priority order
    #[serde(default = "default_languages", deserialize_with = "languages_or_default")]
    pub languages: Vec<String>,
    /// Speed/accuracy tradeoff
    #[serde(default, deserialize_with = "lenient_level")]
    pub recognition_level: RecognitionLevel,
    /// Apply dictionary-based language correction
    #[serde(default = "default_true", deserialize_with = "bool_or_true")]
    pub uses_language_correction: bool,
}

impl OcrExtractArgs {
    /// Validate the raw `arguments` object of a `tools/call` request.
    pub fn from_arguments(arguments: Option<&Map<String, Value>>) -> Result<Self> {
        let Some(arguments) = arguments else {
            return Err(OcrMcpError::MissingParameter("image".to_string()));
        };
        if arguments.get("image").map_or(true, Value::is_null) {
            return Err(OcrMcpError::MissingParameter("image".to_string()));
        }

        serde_json::from_value(Value::Object(arguments.clone())).map_err(|e| {
            OcrMcpError::InvalidParameter {
                name: "arguments".to_string(),
                reason: e.to_string(),
            }
        })
    }
}

fn default_languages() -> Vec<String> {
    vec![DEFAULT_LANGUAGE.to_string()]
}

fn default_true() -> bool {
    true
}

fn languages_or_default<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let languages = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
    if languages.is_empty() {
        return Ok(default_languages());
    }
    Ok(languages)
}

// Anything but "fast", including non-strings, means accurate.
fn lenient_level<'de, D>(deserializer: D) -> std::result::Result<RecognitionLevel, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .map(RecognitionLevel::from_arg)
        .unwrap_or_default())
}

fn bool_or_true<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

/// Fold a tool outcome into the MCP result shape. Failures become
/// `isError: true` results carrying the error message.
pub fn tool_result(outcome: Result<String>) -> CallToolResult {
    match outcome {
        Ok(text) => {
            info!(tool = TOOL_NAME, chars = text.len(), "Tool call succeeded");
            CallToolResult::success(vec![Content::text(text)])
        }
        Err(e) => {
            warn!(
                tool = TOOL_NAME,
                error = %e,
                retryable = e.is_retryable(),
                "Tool call failed"
            );
            CallToolResult::error(vec![Content::text(e.to_string())])
        }
    }
}

/// Drives one tool call: resolve the image, run OCR, release the image.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    resolver: ImageResolver,
    ocr: OcrProvider,
}

impl ToolDispatcher {
    pub fn new(resolver: ImageResolver, ocr: OcrProvider) -> Self {
        Self { resolver, ocr }
    }

    /// Check the tool name and arguments without touching the resolver or the engine.
    pub fn validate(&self, name: &str, arguments: Option<&Map<String, Value>>) -> Result<OcrExtractArgs> {
        if name != TOOL_NAME {
            return Err(OcrMcpError::UnknownTool(name.to_string()));
        }
        OcrExtractArgs::from_arguments(arguments)
    }

    pub async fn run(&self, name: &str, arguments: Option<&Map<String, Value>>) -> Result<String> {
        let args = self.validate(name, arguments)?;
        self.extract(args).await
    }

    pub async fn extract(&self, args: OcrExtractArgs) -> Result<String> {
        let mut image = self.resolver.resolve(&args.image).await?;
        let request = OcrRequest {
            path: image.path().to_path_buf(),
            languages: args.languages,
            recognition_level: args.recognition_level,
            uses_language_correction: args.uses_language_correction,
        };

        // Dropping the image also releases it if this future is cancelled.
        let outcome = self.ocr.run(request).await;
        image.release();
        outcome
    }

    /// Like [`run`](Self::run) but folds every failure into an error result.
    pub async fn call(&self, name: &str, arguments: Option<&Map<String, Value>>) -> CallToolResult {
        tool_result(self.run(name, arguments).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(value: Value) -> Result<OcrExtractArgs> {
        OcrExtractArgs::from_arguments(value.as_object())
    }

    #[test]
    fn test_defaults_applied() {
        let args = parse(json!({"image": "/tmp/a.png"})).unwrap();
        assert_eq!(
            args,
            OcrExtractArgs {
                image: "/tmp/a.png".to_string(),
                languages: vec!["en-US".to_string()],
                recognition_level: RecognitionLevel::Accurate,
                uses_language_correction: true,
            }
        );
    }

    #[test]
    fn test_all_arguments_parsed() {
        let args = parse(json!({
            "image": "/tmp/a.png",
            "languages": ["fr-FR", "en-US"],
            "recognitionLevel": "fast",
            "usesLanguageCorrection": false
        }))
        .unwrap();
        assert_eq!(args.languages, vec!["fr-FR".to_string(), "en-US".to_string()]);
        assert_eq!(args.recognition_level, RecognitionLevel::Fast);
        assert!(!args.uses_language_correction);
    }

    #[test]
    fn test_missing_image() {
        let err = parse(json!({"languages": ["en"]})).unwrap_err();
        assert!(matches!(err, OcrMcpError::MissingParameter(ref p) if p == "image"));

        let err = parse(json!({"image": null})).unwrap_err();
        assert!(matches!(err, OcrMcpError::MissingParameter(_)));

        let err = OcrExtractArgs::from_arguments(None).unwrap_err();
        assert!(matches!(err, OcrMcpError::MissingParameter(_)));
    }

    #[test]
    fn test_invalid_types_rejected() {
        let cases = [
            json!({"image": 42}),
            json!({"image": "a", "languages": "en"}),
            json!({"image": "a", "languages": [1]}),
            json!({"image": "a", "usesLanguageCorrection": "yes"}),
        ];
        for value in cases {
            match parse(value.clone()) {
                Err(OcrMcpError::InvalidParameter { name, reason }) => {
                    assert_eq!(name, "arguments");
                    assert!(reason.contains("invalid type"), "unexpected reason: {reason}");
                }
                other => panic!("expected InvalidParameter for {value}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_level_and_empty_languages_fall_back() {
        let args = parse(json!({
            "image": "a",
            "languages": [],
            "recognitionLevel": "turbo"
        }))
        .unwrap();
        assert_eq!(args.languages, vec!["en-US".to_string()]);
        assert_eq!(args.recognition_level, RecognitionLevel::Accurate);

        let args = parse(json!({
            "image": "a",
            "recognitionLevel": 3,
            "languages": null,
            "usesLanguageCorrection": null
        }))
        .unwrap();
        assert_eq!(args.recognition_level, RecognitionLevel::Accurate);
        assert_eq!(args.languages, vec!["en-US".to_string()]);
        assert!(args.uses_language_correction);
    }

    #[test]
    fn test_schema_lists_image_as_required() {
        let schema = serde_json::to_value(schemars::schema_for!(OcrExtractArgs)).unwrap();
        assert_eq!(schema["required"], json!(["image"]));
        assert_eq!(
            schema["properties"]["usesLanguageCorrection"]["default"],
            json!(true)
        );
        assert_eq!(schema["properties"]["languages"]["default"], json!(["en-US"]));
    }

    #[test]
    fn test_failure_is_an_error_result() {
        let result = serde_json::to_value(tool_result(Err(OcrMcpError::NoTextFound))).unwrap();
        assert_eq!(result["isError"], json!(true));
        assert_eq!(result["content"][0]["type"], json!("text"));
        assert_eq!(result["content"][0]["text"], json!("No text found in image"));

        let result = serde_json::to_value(tool_result(Ok("HELLO".to_string()))).unwrap();
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["content"][0]["text"], json!("HELLO"));
    }
}
