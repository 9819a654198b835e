use thiserror::Error;

pub type KmlResult<T> = Result<T, KmlError>;

#[derive(Error, Debug, Clone)]
pub enum KmlError {
    #[error("No KML content to parse")]
    EmptyDocument,

    #[error("Content must be a valid KML document: {0}")]
    MalformedDocument(String),

    #[error("XML parse error: {0}")]
    XmlError(String),

    #[error("No KML found in the archive")]
    NoPrimaryDocument,

    #[error("Error reading archive: {0}")]
    MalformedArchive(String),

    #[error("Failed to fetch external stylesheet '{url}': {reason}")]
    StylesheetFetch { url: String, reason: String },

    #[error("Could not parse KML stylesheet '{url}'")]
    MalformedStylesheet { url: String },

    #[error("Failed parsing node type <{tag}>: {reason}")]
    NodeBuild { tag: String, reason: String },
}

impl KmlError {
    /// Fatal errors abort the parse and leave no usable root node. Everything
    /// else is swallowed locally with a diagnostic log entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KmlError::EmptyDocument
                | KmlError::MalformedDocument(_)
                | KmlError::XmlError(_)
                | KmlError::NoPrimaryDocument
                | KmlError::MalformedArchive(_)
        )
    }
}

impl From<roxmltree::Error> for KmlError {
    fn from(err: roxmltree::Error) -> Self {
        KmlError::XmlError(err.to_string())
    }
}
