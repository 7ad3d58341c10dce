use std::collections::BTreeMap;
use std::io::Write;

use minijinja::value::Value;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::delivery::Delivery;
use crate::output::error::{ErrorOutput, Result};

const TEMPLATE_NAME: &str = "delivery";

/// Context variable holding every field at once; a bare `{{.}}` refers to it.
const WHOLE_DELIVERY: &str = "Delivery";

/// A compiled output template.
pub struct Template {
    env: Environment<'static>,
}

impl Template {
    /// Read the whole input and compile it.
    pub async fn read_from<R: AsyncRead + Unpin>(mut input: R) -> Result<Self> {
        info!("Reading template from STDIN");
        let mut source = String::new();
        input
            .read_to_string(&mut source)
            .await
            .map_err(ErrorOutput::ReadTemplate)?;
        Self::compile(&source)
    }

    pub fn compile(source: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        minijinja_contrib::add_to_environment(&mut env);
        env.add_filter("asText", as_text);
        env.add_function("asText", as_text);

        let source = strip_leading_dots(source);
        debug!("Compiling template ({} bytes)", source.len());
        env.add_template_owned(TEMPLATE_NAME, source)
            .map_err(ErrorOutput::Compile)?;

        Ok(Self { env })
    }

    pub fn render<W: Write>(&self, delivery: &Delivery, out: &mut W) -> Result<()> {
        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(ErrorOutput::Render)?;
        template
            .render_captured_to(context(delivery), out)
            .map_err(ErrorOutput::Render)?;
        Ok(())
    }
}

fn context(delivery: &Delivery) -> Value {
    let mut fields = fields(delivery);
    let whole = Value::from_serialize(&fields);
    fields.insert(WHOLE_DELIVERY, whole);
    Value::from_serialize(&fields)
}

fn fields(delivery: &Delivery) -> BTreeMap<&'static str, Value> {
    BTreeMap::from([
        ("Headers", Value::from_serialize(&delivery.headers)),
        ("ContentType", Value::from_serialize(&delivery.content_type)),
        ("ContentEncoding", Value::from_serialize(&delivery.content_encoding)),
        ("DeliveryMode", Value::from_serialize(delivery.delivery_mode)),
        ("Priority", Value::from_serialize(delivery.priority)),
        ("CorrelationId", Value::from_serialize(&delivery.correlation_id)),
        ("ReplyTo", Value::from_serialize(&delivery.reply_to)),
        ("Expiration", Value::from_serialize(&delivery.expiration)),
        ("MessageId", Value::from_serialize(&delivery.message_id)),
        (
            "Timestamp",
            Value::from_serialize(delivery.timestamp.map(|ts| ts.to_rfc3339())),
        ),
        ("Type", Value::from_serialize(&delivery.kind)),
        ("UserId", Value::from_serialize(&delivery.user_id)),
        ("AppId", Value::from_serialize(&delivery.app_id)),
        ("DeliveryTag", Value::from(delivery.delivery_tag)),
        ("Redelivered", Value::from(delivery.redelivered)),
        ("Exchange", Value::from(delivery.exchange.as_str())),
        ("RoutingKey", Value::from(delivery.routing_key.as_str())),
        ("Body", Value::from_bytes(delivery.body.clone())),
    ])
}

/// Decode bytes as (lossy) UTF-8. Strings pass through unchanged.
fn as_text(value: Value) -> std::result::Result<String, minijinja::Error> {
    if let Some(text) = value.as_str() {
        return Ok(text.to_string());
    }
    if let Some(bytes) = value.as_bytes() {
        return Ok(String::from_utf8_lossy(bytes).into_owned());
    }
    Err(minijinja::Error::new(
        ErrorKind::InvalidOperation,
        format!("asText expects bytes or a string, got {}", value.kind()),
    ))
}

/// Accept `{{.Body}}` style field references by dropping the leading dot of identifiers
/// inside tags, and turn a bare `.` into the whole delivery. Dots after identifiers,
/// brackets and parentheses (attribute access) and dots inside string literals are kept.
fn strip_leading_dots(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start + 2]);
        rest = &rest[start + 2..];
        let end = rest.find("}}").unwrap_or(rest.len());
        strip_in_tag(&rest[..end], &mut out);
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

fn strip_in_tag(tag: &str, out: &mut String) {
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut chars = tag.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q && prev != Some('\\') {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '.' => {
                let attribute = prev
                    .is_some_and(|p| p.is_alphanumeric() || p == '_' || p == ')' || p == ']');
                let next = chars.peek().copied();
                let field = next.is_some_and(|n| n.is_alphabetic() || n == '_');
                let number = next.is_some_and(|n| n.is_ascii_digit());
                if attribute || number {
                    out.push(c);
                } else if !field {
                    out.push_str(WHOLE_DELIVERY);
                }
            }
            None => out.push(c),
        }
        prev = Some(c);
    }
}
