use thiserror::Error;

pub type Result<T> = std::result::Result<T, ErrorOutput>;

#[derive(Error, Debug)]
pub enum ErrorOutput {
    #[error("failed to read template: {0}")]
    ReadTemplate(#[source] std::io::Error),

    #[error("failed to compile template: {0}")]
    Compile(#[source] minijinja::Error),

    #[error("failed to render template: {0}")]
    Render(#[source] minijinja::Error),

    #[error("failed to encode delivery as json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Write(#[from] std::io::Error),
}
