use std::sync::OnceLock;

use text_splitter::{ChunkConfig, TextSplitter};

use common::{
    error::AppError,
    utils::config::{AppConfig, ChunkUnit},
};

use crate::extract::PageText;

/// Chunking parameters, measured in characters or tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub unit: ChunkUnit,
}

impl ChunkingConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
            unit: cfg.chunk_unit,
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size == 0 {
            return Err(AppError::Validation("chunk_size must be non-zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A chunk of page text awaiting embedding. `sequence_index` numbers
/// chunks across the whole document, not per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub text: String,
    pub page_number: u32,
    pub sequence_index: u32,
}

/// Splits extracted pages into overlapping chunks. A page never spans a
/// chunk boundary: every chunk carries exactly one page number, so a
/// citation can always name the page its text came from.
pub fn plan_chunks(
    pages: &[PageText],
    config: &ChunkingConfig,
) -> Result<Vec<PlannedChunk>, AppError> {
    config.validate()?;

    let mut planned = Vec::new();
    let mut sequence_index: u32 = 0;

    for page in pages {
        for text in split_text(&page.text, config)? {
            if text.trim().is_empty() {
                continue;
            }
            planned.push(PlannedChunk {
                text,
                page_number: page.page_number,
                sequence_index,
            });
            sequence_index += 1;
        }
    }

    Ok(planned)
}

fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>, AppError> {
    match config.unit {
        ChunkUnit::Characters => {
            let chunk_config = ChunkConfig::new(config.chunk_size)
                .with_overlap(config.chunk_overlap)
                .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
            let splitter = TextSplitter::new(chunk_config);
            Ok(splitter.chunks(text).map(str::to_owned).collect())
        }
        ChunkUnit::Tokens => {
            let tokenizer = get_tokenizer()?;
            let chunk_config = ChunkConfig::new(config.chunk_size)
                .with_overlap(config.chunk_overlap)
                .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?
                .with_sizer(tokenizer);
            let splitter = TextSplitter::new(chunk_config);
            Ok(splitter.chunks(text).map(str::to_owned).collect())
        }
    }
}

fn get_tokenizer() -> Result<&'static tokenizers::Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<tokenizers::Tokenizer, String>> = OnceLock::new();

    match TOKENIZER.get_or_init(|| {
        tokenizers::Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|e| format!("failed to initialize tokenizer: {e}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}
