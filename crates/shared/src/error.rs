use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BinderError {
    #[error("[{tag}] {component}: {message}")]
    Configuration {
        component: &'static str,
        tag: String,
        message: String,
    },
    #[error("failed to call '{action}' to handle '{event}' event on tag '{tag}': {message}")]
    Dispatch {
        action: String,
        event: String,
        tag: String,
        message: String,
    },
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("request to {url} was cancelled")]
    Cancelled { url: String },
    #[error("expression evaluation failed: {0}")]
    Evaluation(String),
    #[error("unsupported selector: {0}")]
    UnsupportedSelector(String),
    #[error("html parse error: {0}")]
    HtmlParse(String),
}

impl BinderError {
    pub fn configuration(
        component: &'static str,
        tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            component,
            tag: tag.into(),
            message: message.into(),
        }
    }

    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
