//! Turning user intents into outbound deep links.
//!
//! Composition is pure: no I/O, and the same intent always yields the same
//! URI. Opening the URI is the platform's job.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono::format::{Item, StrftimeItems};
use tracing::debug;

use crate::{
    config::{MapConfig, MessagingConfig},
    error::{ComposeError, ConfigurationError},
    geo::Coordinate,
    model::{ActionIntent, IntentKind},
};

/// Field whose ISO-8601 value is reformatted for display.
pub const TIMESTAMP_FIELD: &str = "timestampISO";

const PHONE_PLACEHOLDER: &str = "{phone}";
const TEXT_PLACEHOLDER: &str = "{text}";
const QUERY_PLACEHOLDER: &str = "{query}";

const ISO_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// A composed deep link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageUri(String);

impl MessageUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for MessageUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed message template: literal text and `{field}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse a template. `{{` and `}}` stand for literal braces; placeholder
    /// names are letters, digits and underscores.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) if c.is_alphanumeric() || c == '_' => name.push(c),
                            Some(c) => {
                                return Err(format!("unexpected character '{c}' in placeholder"));
                            }
                            None => return Err("unclosed '{'".to_string()),
                        }
                    }
                    if name.is_empty() {
                        return Err("empty placeholder".to_string());
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err("unmatched '}'".to_string()),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Placeholder names in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    fn render(
        &self,
        intent: &ActionIntent,
        timestamp_format: &str,
    ) -> Result<String, ComposeError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = intent.field(name).ok_or_else(|| ComposeError::MissingField {
                        kind: intent.kind,
                        field: name.clone(),
                    })?;
                    if name == TIMESTAMP_FIELD {
                        out.push_str(&format_timestamp(value, timestamp_format)?);
                    } else {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Parse an ISO-8601 timestamp and format it for display.
///
/// Accepts local date-times with or without seconds, and RFC 3339 with an
/// offset, which is shown in its own local time.
pub fn format_timestamp(raw: &str, format: &str) -> Result<String, ComposeError> {
    let naive = ISO_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
        .ok_or_else(|| ComposeError::InvalidTimestamp(raw.to_string()))?;

    let mut out = String::new();
    write!(out, "{}", naive.format(format))
        .map_err(|_| ComposeError::InvalidTimestamp(raw.to_string()))?;
    Ok(out)
}

fn validate_timestamp_format(format: &str) -> Result<(), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidTimestampFormat(format.to_string());

    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid());
    }
    // Some specifiers (time zones) parse fine but cannot format a naive value.
    let sample = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(18, 0, 0))
        .ok_or_else(invalid)?;
    let mut out = String::new();
    write!(out, "{}", sample.format(format)).map_err(|_| invalid())?;
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), ConfigurationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 3 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigurationError::InvalidRecipient(phone.to_string()));
    }
    Ok(())
}

fn validate_uri_template(
    template: &str,
    placeholders: &[&str],
    probe: &str,
) -> Result<(), ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidUriTemplate {
        template: template.to_string(),
        reason,
    };

    for placeholder in placeholders {
        match template.matches(placeholder).count() {
            1 => {}
            0 => return Err(invalid(format!("missing {placeholder}"))),
            _ => return Err(invalid(format!("{placeholder} appears more than once"))),
        }
    }
    url::Url::parse(probe).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Renders intents into messaging deep links for the deployment's recipient.
#[derive(Debug, Clone)]
pub struct ActionMessageComposer {
    recipient_phone: String,
    uri_template: String,
    timestamp_format: String,
    templates: Vec<(IntentKind, MessageTemplate)>,
}

impl ActionMessageComposer {
    /// Validate the messaging configuration and build the composer.
    pub fn new(config: &MessagingConfig) -> Result<Self, ConfigurationError> {
        let recipient_phone = config
            .recipient_phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ConfigurationError::MissingRecipient)?
            .to_string();
        validate_phone(&recipient_phone)?;

        let probe = config
            .uri_template
            .replace(PHONE_PLACEHOLDER, &recipient_phone)
            .replace(TEXT_PLACEHOLDER, "probe");
        validate_uri_template(
            &config.uri_template,
            &[PHONE_PLACEHOLDER, TEXT_PLACEHOLDER],
            &probe,
        )?;

        validate_timestamp_format(&config.timestamp_format)?;

        let templates = IntentKind::all()
            .iter()
            .map(|&kind| {
                MessageTemplate::parse(config.templates.get(kind))
                    .map(|template| (kind, template))
                    .map_err(|reason| ConfigurationError::InvalidMessageTemplate { kind, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(recipient = %recipient_phone, "message composer ready");

        Ok(Self {
            recipient_phone,
            uri_template: config.uri_template.clone(),
            timestamp_format: config.timestamp_format.clone(),
            templates,
        })
    }

    pub fn recipient_phone(&self) -> &str {
        &self.recipient_phone
    }

    pub fn template(&self, kind: IntentKind) -> Result<&MessageTemplate, ConfigurationError> {
        self.templates
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, template)| template)
            .ok_or_else(|| ConfigurationError::InvalidMessageTemplate {
                kind,
                reason: "no template configured".to_string(),
            })
    }

    /// The human-readable message for `intent`, before encoding.
    pub fn render(&self, intent: &ActionIntent) -> Result<String, ComposeError> {
        self.template(intent.kind)?.render(intent, &self.timestamp_format)
    }

    /// Render, percent-encode and wrap `intent` in the channel's deep link.
    pub fn compose(&self, intent: &ActionIntent) -> Result<MessageUri, ComposeError> {
        let text = self.render(intent)?;
        let encoded = urlencoding::encode(&text);

        let uri = self
            .uri_template
            .replace(PHONE_PLACEHOLDER, &self.recipient_phone)
            .replace(TEXT_PLACEHOLDER, &encoded);

        debug!(kind = %intent.kind, len = uri.len(), "composed message uri");
        Ok(MessageUri(uri))
    }
}

/// Builds map deep links searching for a coordinate.
#[derive(Debug, Clone)]
pub struct MapLinkBuilder {
    uri_template: String,
}

impl MapLinkBuilder {
    pub fn new(config: &MapConfig) -> Result<Self, ConfigurationError> {
        let probe = config.uri_template.replace(QUERY_PLACEHOLDER, "0%2C0");
        validate_uri_template(&config.uri_template, &[QUERY_PLACEHOLDER], &probe)?;
        Ok(Self { uri_template: config.uri_template.clone() })
    }

    pub fn link(&self, coordinate: Coordinate) -> MessageUri {
        let query = coordinate.as_query();
        MessageUri(
            self.uri_template
                .replace(QUERY_PLACEHOLDER, &urlencoding::encode(&query)),
        )
    }
}
