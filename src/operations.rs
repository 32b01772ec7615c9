//! Remote operation catalog
//!
//! The three human prompts this bridge offers to its embedding host. Each
//! one is a thin shape over [`RequestFacade::invoke`](crate::facade::RequestFacade::invoke):
//! validate the arguments, forward them as the request payload, render the
//! companion's answer as one line of text.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::BridgeError;

/// Which prompt the companion should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Buttons,
    Text,
    Confirm,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buttons => "buttons",
            Self::Text => "text",
            Self::Confirm => "confirm",
        }
    }

    fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Buttons => &["title", "message", "options"],
            Self::Text => &["title", "prompt"],
            Self::Confirm => &["title", "message"],
        }
    }

    fn optional_fields(self) -> &'static [&'static str] {
        match self {
            Self::Buttons => &[],
            Self::Text => &["placeholder", "defaultValue"],
            Self::Confirm => &["confirmText", "cancelText"],
        }
    }

    /// Build the request payload from caller arguments.
    ///
    /// Unknown arguments are dropped; confirm button labels default to
    /// `Yes`/`No` when absent or empty.
    pub fn prepare_payload(self, arguments: &Value) -> Result<Value, BridgeError> {
        let args = arguments
            .as_object()
            .ok_or_else(|| BridgeError::Operation("arguments must be an object".into()))?;

        let mut payload = Map::new();
        for field in self.required_fields() {
            match args.get(*field) {
                Some(value) if !value.is_null() => {
                    payload.insert(field.to_string(), value.clone());
                }
                _ => {
                    return Err(BridgeError::Operation(format!(
                        "missing required argument `{}`",
                        field
                    )))
                }
            }
        }
        for field in self.optional_fields() {
            if let Some(value) = args.get(*field).filter(|v| !v.is_null()) {
                payload.insert(field.to_string(), value.clone());
            }
        }

        if self == Self::Buttons && !payload["options"].is_array() {
            return Err(BridgeError::Operation("`options` must be an array".into()));
        }
        if self == Self::Confirm {
            for (field, default) in [("confirmText", "Yes"), ("cancelText", "No")] {
                if text_of(payload.get(field)).is_empty() {
                    payload.insert(field.to_string(), json!(default));
                }
            }
        }
        Ok(Value::Object(payload))
    }

    /// One line of text describing the companion's answer.
    pub fn format_response(self, response: &Value) -> String {
        let value = text_of(response.get("value"));
        match self {
            Self::Buttons => format!("User selected: {}", value),
            Self::Text if value.is_empty() => "User entered: (empty)".to_string(),
            Self::Text => format!("User entered: {}", value),
            Self::Confirm if !value.is_empty() => {
                format!("User provided custom response: {}", value)
            }
            Self::Confirm => {
                let confirmed = response
                    .get("confirmed")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if confirmed {
                    "User confirmed".to_string()
                } else {
                    "User declined".to_string()
                }
            }
        }
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// How an invocation failure is shown to the host.
pub fn render_error(error: &BridgeError) -> String {
    format!("Error: {}", error)
}

/// A named operation as advertised to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub name: &'static str,
    #[serde(skip)]
    pub kind: InputKind,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Runs one operation: arguments in, rendered text out.
pub type OperationHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, BridgeError>> + Send + Sync>;

/// The embedding host that exposes operations to its own caller.
pub trait OperationHost: Send + Sync {
    /// Declare `spec`, replacing any handler already registered under its name.
    fn register_operation(&self, spec: OperationSpec, handler: OperationHandler);
}

/// The three prompts, in advertisement order.
pub fn catalog() -> Vec<OperationSpec> {
    vec![
        OperationSpec {
            name: "ask_user_buttons",
            kind: InputKind::Buttons,
            description: "Ask the user to choose from multiple predefined options using buttons. \
                BEST FOR: Multiple choice questions, menu selections, preference choices. \
                Each option should be distinct and clear. Users can also provide custom text \
                if none of the buttons fit their needs. The message supports Markdown formatting.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Title of the popup" },
                    "message": {
                        "type": "string",
                        "description": "Message to display to the user (supports Markdown formatting)"
                    },
                    "options": {
                        "type": "array",
                        "description": "Array of button options",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": { "type": "string", "description": "Button label" },
                                "value": {
                                    "type": "string",
                                    "description": "Value returned when button is clicked"
                                }
                            },
                            "required": ["label", "value"]
                        }
                    }
                },
                "required": ["title", "message", "options"]
            }),
        },
        OperationSpec {
            name: "ask_user_text",
            kind: InputKind::Text,
            description: "Ask the user for free-form text input. BEST FOR: Open-ended questions, \
                detailed explanations, custom input where you need the user to type their own \
                response. Always provide a clear, specific prompt. The prompt supports Markdown \
                formatting.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Title of the input box" },
                    "prompt": {
                        "type": "string",
                        "description": "Prompt message for the user (supports Markdown formatting)"
                    },
                    "placeholder": {
                        "type": "string",
                        "description": "Placeholder text for the input field"
                    },
                    "defaultValue": {
                        "type": "string",
                        "description": "Default value for the input field"
                    }
                },
                "required": ["title", "prompt"]
            }),
        },
        OperationSpec {
            name: "ask_user_confirm",
            kind: InputKind::Confirm,
            description: "Ask the user for a single binary decision with positive/negative outcome. \
                ONLY USE FOR: Single actions that can be confirmed or declined. DO NOT USE for \
                choosing between two different options - use ask_user_buttons instead. Users can \
                also provide custom text to explain their choice. The message supports Markdown \
                formatting.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Title of the confirmation dialog" },
                    "message": {
                        "type": "string",
                        "description": "Single question about one action that user can confirm or decline"
                    },
                    "confirmText": {
                        "type": "string",
                        "description": "Text for the positive/confirm button (default: 'Yes')"
                    },
                    "cancelText": {
                        "type": "string",
                        "description": "Text for the negative/cancel button (default: 'No')"
                    }
                },
                "required": ["title", "message"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_and_kinds() {
        let ops = catalog();
        let names: Vec<_> = ops.iter().map(|op| (op.name, op.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("ask_user_buttons", InputKind::Buttons),
                ("ask_user_text", InputKind::Text),
                ("ask_user_confirm", InputKind::Confirm),
            ]
        );
        for op in &ops {
            assert_eq!(op.input_schema["type"], "object");
        }
    }

    #[test]
    fn test_confirm_defaults_filled() {
        let payload = InputKind::Confirm
            .prepare_payload(&json!({"title": "Save", "message": "Save changes?", "cancelText": ""}))
            .unwrap();
        assert_eq!(payload["confirmText"], "Yes");
        assert_eq!(payload["cancelText"], "No");

        let custom = InputKind::Confirm
            .prepare_payload(&json!({"title": "t", "message": "m", "confirmText": "Ship it"}))
            .unwrap();
        assert_eq!(custom["confirmText"], "Ship it");
    }

    #[test]
    fn test_missing_required_argument() {
        let err = InputKind::Text
            .prepare_payload(&json!({"title": "Name"}))
            .unwrap_err();
        assert!(err.to_string().contains("prompt"));

        let err = InputKind::Buttons
            .prepare_payload(&json!({"title": "t", "message": "m", "options": "a,b"}))
            .unwrap_err();
        assert!(err.to_string().contains("options"));

        assert!(InputKind::Confirm.prepare_payload(&json!("nope")).is_err());
    }

    #[test]
    fn test_unknown_arguments_dropped() {
        let payload = InputKind::Text
            .prepare_payload(&json!({"title": "t", "prompt": "p", "extra": 1}))
            .unwrap();
        assert_eq!(payload, json!({"title": "t", "prompt": "p"}));
    }

    #[test]
    fn test_format_response() {
        assert_eq!(
            InputKind::Buttons.format_response(&json!({"value": "blue"})),
            "User selected: blue"
        );
        assert_eq!(
            InputKind::Text.format_response(&json!({"value": ""})),
            "User entered: (empty)"
        );
        assert_eq!(
            InputKind::Text.format_response(&json!({"value": "hello"})),
            "User entered: hello"
        );
        assert_eq!(
            InputKind::Confirm.format_response(&json!({"confirmed": true})),
            "User confirmed"
        );
        assert_eq!(
            InputKind::Confirm.format_response(&json!({"confirmed": false})),
            "User declined"
        );
        assert_eq!(
            InputKind::Confirm.format_response(&json!({"confirmed": false, "value": "later"})),
            "User provided custom response: later"
        );
    }

    #[test]
    fn test_render_error() {
        assert!(render_error(&BridgeError::NotConnected).starts_with("Error: Interactive companion not connected"));
    }
}
