// Pipeline processing: flattening, period classification, dimensions, ranking and sentences

pub mod dimensions;
pub mod flatten;
pub mod period;
pub mod ranking;
pub mod sentences;

pub use dimensions::{project_filings, ConceptConflict, DimensionBuilder, Dimensions};
pub use flatten::{flatten_document, EntityObservation, FlattenedDocument};
pub use ranking::rank_facts;
pub use sentences::{generate_sentences, render_sentence};
