pub mod extract;
pub mod pipeline;
pub mod splitter;

pub use extract::{extract_pages, PageText};
pub use pipeline::{
    BatchFailure, DefaultPipelineServices, IngestionPipeline, IngestionReport, PipelineServices,
};
pub use splitter::{plan_chunks, ChunkingConfig, PlannedChunk};
