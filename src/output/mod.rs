pub mod error;
pub mod template;

use std::io::Write;

use clap::ValueEnum;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::delivery::Delivery;
use crate::lifecycle::Lifecycle;
use crate::output::error::Result;

pub use template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// Body bytes as is
    #[value(alias = "plain")]
    Body,
    /// Debug dump of the whole delivery
    Dump,
    /// Whole delivery as indented JSON, body in base64
    Json,
    /// Template read from STDIN
    Template,
}

/// How a delivery is written out.
pub enum Handler {
    Body,
    Dump,
    Json,
    Template(Box<Template>),
}

impl Handler {
    /// Build the handler for `kind`. Only the template handler reads `input`.
    pub async fn prepare<R: AsyncRead + Unpin>(kind: OutputKind, input: R) -> Result<Self> {
        Ok(match kind {
            OutputKind::Body => Handler::Body,
            OutputKind::Dump => Handler::Dump,
            OutputKind::Json => Handler::Json,
            OutputKind::Template => Handler::Template(Box::new(Template::read_from(input).await?)),
        })
    }

    pub fn render<W: Write>(&self, delivery: &Delivery, out: &mut W) -> Result<()> {
        match self {
            Handler::Body => out.write_all(&delivery.body)?,
            Handler::Dump => writeln!(out, "{delivery:#?}")?,
            Handler::Json => {
                serde_json::to_writer_pretty(&mut *out, delivery)?;
                out.write_all(b"\n")?;
            }
            Handler::Template(template) => template.render(delivery, out)?,
        }
        Ok(())
    }
}

/// Renders the first delivery it is given and then completes the lifecycle.
pub struct Dispatcher<W> {
    handler: Handler,
    out: W,
    lifecycle: Lifecycle,
    rendered: bool,
}

impl<W: Write> Dispatcher<W> {
    pub fn new(handler: Handler, out: W, lifecycle: Lifecycle) -> Self {
        Self {
            handler,
            out,
            lifecycle,
            rendered: false,
        }
    }

    /// Returns `Ok(false)` without rendering when a delivery was already rendered.
    pub fn dispatch(&mut self, delivery: Delivery) -> Result<bool> {
        if self.rendered {
            debug!("Ignoring delivery {}, already rendered one", delivery.delivery_tag);
            return Ok(false);
        }

        self.handler.render(&delivery, &mut self.out)?;
        self.out.flush()?;
        self.rendered = true;

        info!("Delivery {} rendered", delivery.delivery_tag);
        self.lifecycle.complete();
        Ok(true)
    }

    pub fn rendered(&self) -> bool {
        self.rendered
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::lifecycle::ShutdownReason;
    use crate::output::error::ErrorOutput;

    /// Cloneable in-memory sink.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sample() -> Delivery {
        let mut headers = BTreeMap::new();
        headers.insert("attempt".to_string(), serde_json::json!(3));
        Delivery {
            headers,
            content_type: Some("application/octet-stream".into()),
            delivery_mode: Some(2),
            message_id: Some("m-1".into()),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).single(),
            kind: Some("event".into()),
            delivery_tag: 7,
            exchange: "events".into(),
            routing_key: "a.b".into(),
            body: vec![0, 159, 146, 150, b'h', b'i'],
            ..Default::default()
        }
    }

    async fn render(kind: OutputKind, delivery: &Delivery) -> Vec<u8> {
        let handler = Handler::prepare(kind, &b""[..]).await.unwrap();
        let mut out = Vec::new();
        handler.render(delivery, &mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn body_is_written_verbatim() {
        let delivery = sample();
        assert_eq!(render(OutputKind::Body, &delivery).await, delivery.body);
    }

    #[tokio::test]
    async fn json_round_trips_binary_body() {
        let delivery = sample();
        let out = render(OutputKind::Json, &delivery).await;
        assert!(String::from_utf8(out.clone()).unwrap().contains("\n  \"Body\""));

        let decoded: Delivery = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded, delivery);
    }

    #[tokio::test]
    async fn dump_includes_metadata_and_hex_body() {
        let out = String::from_utf8(render(OutputKind::Dump, &sample()).await).unwrap();
        assert!(out.contains("RoutingKey: \"a.b\""));
        assert!(out.contains("00 9f 92 96 68 69"));
    }

    #[tokio::test]
    async fn dispatch_renders_once_and_completes_lifecycle() {
        let lifecycle = Lifecycle::new();
        let out = SharedBuffer::default();
        let mut dispatcher = Dispatcher::new(Handler::Body, out.clone(), lifecycle.clone());

        let mut first = sample();
        first.body = b"hello".to_vec();
        assert!(dispatcher.dispatch(first).unwrap());
        assert!(!dispatcher.dispatch(sample()).unwrap());

        assert_eq!(out.contents(), b"hello");
        assert_eq!(lifecycle.reason(), Some(ShutdownReason::Completed));
    }

    #[test]
    fn write_failure_is_fatal_and_keeps_lifecycle_running() {
        let lifecycle = Lifecycle::new();
        let mut dispatcher = Dispatcher::new(Handler::Body, BrokenPipe, lifecycle.clone());
        assert!(matches!(
            dispatcher.dispatch(sample()),
            Err(ErrorOutput::Write(_))
        ));
        assert!(!dispatcher.rendered());
        assert!(!lifecycle.is_cancelled());
    }

    #[tokio::test]
    async fn template_compile_error_surfaces_at_prepare() {
        let result = Handler::prepare(OutputKind::Template, &b"{% if %}"[..]).await;
        assert!(matches!(result, Err(ErrorOutput::Compile(_))));
    }
}
