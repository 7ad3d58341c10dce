use std::collections::BTreeMap;
use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use lapin::types::AMQPValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// One consumed message, detached from the broker client.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Delivery {
    pub headers: BTreeMap<String, Value>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let properties = &delivery.properties;
        let text = |value: &Option<lapin::types::ShortString>| {
            value.as_ref().map(|s| s.as_str().to_string())
        };

        Self {
            headers: properties
                .headers()
                .as_ref()
                .map(|table| {
                    table
                        .inner()
                        .iter()
                        .map(|(name, value)| (name.as_str().to_string(), header_value(value)))
                        .collect()
                })
                .unwrap_or_default(),
            content_type: text(properties.content_type()),
            content_encoding: text(properties.content_encoding()),
            delivery_mode: *properties.delivery_mode(),
            priority: *properties.priority(),
            correlation_id: text(properties.correlation_id()),
            reply_to: text(properties.reply_to()),
            expiration: text(properties.expiration()),
            message_id: text(properties.message_id()),
            timestamp: (*properties.timestamp())
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            kind: text(properties.kind()),
            user_id: text(properties.user_id()),
            app_id: text(properties.app_id()),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            body: delivery.data,
        }
    }
}

/// Converts an AMQP field value into JSON. Binary values that are not UTF-8 become
/// base64 strings.
fn header_value(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(v) => Value::Bool(*v),
        AMQPValue::ShortShortInt(v) => Value::from(*v),
        AMQPValue::ShortShortUInt(v) => Value::from(*v),
        AMQPValue::ShortInt(v) => Value::from(*v),
        AMQPValue::ShortUInt(v) => Value::from(*v),
        AMQPValue::LongInt(v) => Value::from(*v),
        AMQPValue::LongUInt(v) => Value::from(*v),
        AMQPValue::LongLongInt(v) => Value::from(*v),
        AMQPValue::Timestamp(v) => Value::from(*v),
        AMQPValue::Float(v) => float(f64::from(*v)),
        AMQPValue::Double(v) => float(*v),
        AMQPValue::DecimalValue(v) => float(f64::from(v.value) / 10f64.powi(i32::from(v.scale))),
        AMQPValue::ShortString(v) => Value::String(v.as_str().to_string()),
        AMQPValue::LongString(v) => bytes(v.as_bytes()),
        AMQPValue::ByteArray(v) => Value::String(STANDARD.encode(v.as_slice())),
        AMQPValue::FieldArray(v) => Value::Array(v.as_slice().iter().map(header_value).collect()),
        AMQPValue::FieldTable(v) => Value::Object(
            v.inner()
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), header_value(value)))
                .collect::<Map<_, _>>(),
        ),
        AMQPValue::Void => Value::Null,
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn bytes(v: &[u8]) -> Value {
    match std::str::from_utf8(v) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::String(STANDARD.encode(v)),
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("Headers", &self.headers)
            .field("ContentType", &self.content_type)
            .field("ContentEncoding", &self.content_encoding)
            .field("DeliveryMode", &self.delivery_mode)
            .field("Priority", &self.priority)
            .field("CorrelationId", &self.correlation_id)
            .field("ReplyTo", &self.reply_to)
            .field("Expiration", &self.expiration)
            .field("MessageId", &self.message_id)
            .field("Timestamp", &self.timestamp)
            .field("Type", &self.kind)
            .field("UserId", &self.user_id)
            .field("AppId", &self.app_id)
            .field("DeliveryTag", &self.delivery_tag)
            .field("Redelivered", &self.redelivered)
            .field("Exchange", &self.exchange)
            .field("RoutingKey", &self.routing_key)
            .field("Body", &HexDump(&self.body))
            .finish()
    }
}

/// `hexdump -C` style rendering: offset, 16 hex bytes, printable ASCII.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Debug for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "({} bytes)", self.0.len())?;
        for (line, chunk) in self.0.chunks(16).enumerate() {
            write!(f, "{:08x} ", line * 16)?;
            for i in 0..16 {
                if i == 8 {
                    f.write_str(" ")?;
                }
                match chunk.get(i) {
                    Some(b) => write!(f, " {b:02x}")?,
                    None => f.write_str("   ")?,
                }
            }
            f.write_str("  |")?;
            for b in chunk {
                let c = if b.is_ascii_graphic() || *b == b' ' {
                    *b as char
                } else {
                    '.'
                };
                write!(f, "{c}")?;
            }
            writeln!(f, "|")?;
        }
        Ok(())
    }
}

mod base64_body {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
