//! Suggestion engine over a [`suggest_core::traits::SuggestBackend`].
//!
//! [`Suggester`] ties together the contents parser, the buffered writer,
//! the ingestion pipeline and log replicator workers, the index lifecycle
//! and the ranking query builder.

pub mod deadline;
pub mod lifecycle;
pub mod parser;
pub mod pipeline;
pub mod ranking;
pub mod replicator;
pub mod settings;
pub mod suggester;
pub mod translog;
pub mod writer;

pub use parser::{ContentsParser, QueryLog};
pub use pipeline::{IngestionPipeline, Request};
pub use ranking::{PopularWordsRequest, SuggestRequest};
pub use replicator::{LogReplicator, ReplicatorState};
pub use settings::{ElevateWord, SuggestSettings};
pub use suggester::{SuggestIndexResponse, SuggestResponse, Suggester};
pub use translog::{FileTranslog, LogEntry, MemoryTranslog, Translog};
