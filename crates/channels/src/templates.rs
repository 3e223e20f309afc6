//! Template message builder: combines a live template definition with a
//! campaign's stored placeholder values into a provider-ready payload.

use crate::whatsapp::{
    ButtonKind, ComponentKind, ComponentPayload, HeaderFormat, LanguagePayload, LocationParameter,
    MediaLink, Parameter, TemplateDefinition, TemplateMessage, TemplatePayload,
};
use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder values stored on a campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameters {
    #[serde(default)]
    pub body: Vec<String>,
    /// Text values, media URLs, or locations depending on the header format.
    #[serde(default)]
    pub header: Vec<Value>,
    /// One value per button index; blank entries leave that button static.
    #[serde(default)]
    pub buttons: Vec<String>,
}

impl TemplateParameters {
    /// Parses the stored JSON. Returns `Ok(None)` when nothing is stored.
    ///
    /// Accepts either a JSON object or a string holding JSON-encoded text.
    pub fn from_stored(stored: Option<&Value>) -> CampaignResult<Option<Self>> {
        let value = match stored {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(None),
            Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
                .map_err(|e| CampaignError::InvalidParameters(e.to_string()))?,
            Some(other) => other.clone(),
        };
        if value.is_null() {
            return Ok(None);
        }

        let params: TemplateParameters = serde_json::from_value(value)
            .map_err(|e| CampaignError::InvalidParameters(e.to_string()))?;
        if params.is_empty() {
            Ok(None)
        } else {
            Ok(Some(params))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty() && self.header.is_empty() && self.buttons.is_empty()
    }
}

/// Which components of a template carry placeholders that must be filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceholderRequirements {
    pub body: bool,
    pub header: bool,
    pub buttons: bool,
}

impl PlaceholderRequirements {
    pub fn any(&self) -> bool {
        self.body || self.header || self.buttons
    }
}

/// Stateless builder for template message payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMessageBuilder;

impl TemplateMessageBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Inspects component examples to find required placeholders.
    pub fn requirements(template: &TemplateDefinition) -> PlaceholderRequirements {
        let mut req = PlaceholderRequirements::default();
        for component in &template.components {
            match component.kind {
                ComponentKind::Body => {
                    req.body |= component
                        .example
                        .as_ref()
                        .is_some_and(|e| e.has_body_placeholders());
                }
                ComponentKind::Header => {
                    req.header |= component.format == Some(HeaderFormat::Location)
                        || component
                            .example
                            .as_ref()
                            .is_some_and(|e| e.has_header_placeholders());
                }
                ComponentKind::Buttons => {
                    req.buttons |= component
                        .buttons
                        .iter()
                        .any(|b| b.kind == ButtonKind::Url && !b.example.is_empty());
                }
                ComponentKind::Footer | ComponentKind::Other => {}
            }
        }
        req
    }

    /// Builds the message for one recipient.
    ///
    /// Fails with [`CampaignError::MissingTemplateParameters`] when the
    /// template needs placeholders and nothing is stored; that failure applies
    /// to every recipient of the campaign.
    pub fn build(
        &self,
        template: &TemplateDefinition,
        stored: Option<&Value>,
        to: &str,
    ) -> CampaignResult<TemplateMessage> {
        let requirements = Self::requirements(template);
        let params = TemplateParameters::from_stored(stored)?;

        if requirements.any() && params.is_none() {
            return Err(CampaignError::MissingTemplateParameters {
                template: template.name.clone(),
            });
        }
        let params = params.unwrap_or_default();

        let mut components = Vec::new();
        if let Some(header) = self.header_component(template, &params)? {
            components.push(header);
        }
        if template.component(ComponentKind::Body).is_some() {
            let parameters = if requirements.body {
                params
                    .body
                    .iter()
                    .map(|text| Parameter::Text { text: text.clone() })
                    .collect()
            } else {
                Vec::new()
            };
            components.push(ComponentPayload::body(parameters));
        }
        components.extend(self.button_components(template, &params));

        Ok(TemplateMessage::new(
            to,
            TemplatePayload {
                name: template.name.clone(),
                language: LanguagePayload {
                    code: template.language.clone(),
                },
                components,
            },
        ))
    }

    fn header_component(
        &self,
        template: &TemplateDefinition,
        params: &TemplateParameters,
    ) -> CampaignResult<Option<ComponentPayload>> {
        let Some(header) = template.component(ComponentKind::Header) else {
            return Ok(None);
        };

        let format = header.format.unwrap_or(HeaderFormat::Text);
        if format == HeaderFormat::Location {
            let parameters = params
                .header
                .iter()
                .map(parse_location)
                .collect::<CampaignResult<Vec<_>>>()?;
            return Ok(Some(ComponentPayload::header(parameters)));
        }

        let has_example = header
            .example
            .as_ref()
            .is_some_and(|e| e.has_header_placeholders());
        if !has_example {
            return Ok(Some(ComponentPayload::header(Vec::new())));
        }

        let values = params.header.iter().map(value_as_text);
        let parameters = match format {
            HeaderFormat::Text => values.map(|text| Parameter::Text { text }).collect(),
            HeaderFormat::Image => values
                .map(|link| Parameter::Image {
                    image: MediaLink { link },
                })
                .collect(),
            HeaderFormat::Video => values
                .map(|link| Parameter::Video {
                    video: MediaLink { link },
                })
                .collect(),
            HeaderFormat::Document => values
                .map(|link| Parameter::Document {
                    document: MediaLink { link },
                })
                .collect(),
            HeaderFormat::Location | HeaderFormat::Other => Vec::new(),
        };
        Ok(Some(ComponentPayload::header(parameters)))
    }

    fn button_components(
        &self,
        template: &TemplateDefinition,
        params: &TemplateParameters,
    ) -> Vec<ComponentPayload> {
        let Some(buttons) = template.component(ComponentKind::Buttons) else {
            return Vec::new();
        };

        buttons
            .buttons
            .iter()
            .enumerate()
            .filter_map(|(index, button)| {
                let value = params
                    .buttons
                    .get(index)
                    .filter(|v| !v.trim().is_empty())?
                    .clone();
                match button.kind {
                    ButtonKind::Url if !button.example.is_empty() => Some(
                        ComponentPayload::button("url", index, Parameter::Text { text: value }),
                    ),
                    ButtonKind::QuickReply => Some(ComponentPayload::button(
                        "quick_reply",
                        index,
                        Parameter::Payload { payload: value },
                    )),
                    _ => None,
                }
            })
            .collect()
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_location(value: &Value) -> CampaignResult<Parameter> {
    let location: LocationParameter = match value {
        Value::String(raw) => serde_json::from_str(raw),
        other => serde_json::from_value(other.clone()),
    }
    .map_err(|e| CampaignError::InvalidParameters(format!("invalid location header: {e}")))?;
    Ok(Parameter::Location { location })
}
