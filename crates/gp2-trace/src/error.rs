use quick_xml::events::attributes::AttrError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed trace xml at byte {position}: {source}")]
    Syntax {
        #[source]
        source: quick_xml::Error,
        position: u64,
    },
    #[error("xml attribute error: {0}")]
    Attr(#[from] AttrError),
    #[error("expected a <trace> root element but found <{found}>")]
    NotATracefile { found: String },
    #[error("expected a <trace> root element but got an empty tracefile")]
    EmptyTracefile,
    #[error("unknown trace element <{name}> at byte {position}")]
    UnknownElement { name: String, position: u64 },
}
