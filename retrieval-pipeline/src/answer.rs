use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, CreateChatCompletionStreamResponse,
    },
    Client,
};
use futures::{Stream, StreamExt};

use common::error::AppError;

use crate::RetrievedChunk;

const ANSWER_SYSTEM_PROMPT: &str = "You are a careful assistant that answers questions using ONLY the provided context chunks. \
Cite every claim with a marker of the form [n](chunk:<chunk_id>), where n is the context entry number and <chunk_id> is copied verbatim from that entry. \
Never invent chunk ids and never cite chunks you did not use. \
If the context does not contain the answer, say you do not know instead of guessing.";

/// Formats retrieved chunks as a numbered context block. Entry numbers
/// are what the model cites as `[n]`; the chunk id next to each entry is
/// what makes the citation resolvable later.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    let mut context = String::new();
    for (i, retrieved) in chunks.iter().enumerate() {
        context.push_str(&format!(
            "[{n}] chunk:{id} (source: {source}, page {page})\n{text}\n\n",
            n = i + 1,
            id = retrieved.chunk.chunk_id,
            source = retrieved.chunk.source_pdf,
            page = retrieved.chunk.page_number,
            text = retrieved.chunk.text,
        ));
    }
    context
}

pub fn create_user_message(context: &str, question: &str) -> String {
    format!(
        r"
        Context chunks:
        ==================
        {context}

        User Question:
        ==================
        {question}
        "
    )
}

pub fn create_chat_request(
    model: &str,
    user_message: String,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(ANSWER_SYSTEM_PROMPT).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()
}

fn process_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .map(String::from)
        .ok_or(AppError::Processing(
            "No content found in model response".into(),
        ))
}

/// Generates a cited answer for the question over the retrieved chunks.
pub async fn generate_answer(
    client: &Client<async_openai::config::OpenAIConfig>,
    model: &str,
    chunks: &[RetrievedChunk],
    question: &str,
) -> Result<String, AppError> {
    let user_message = create_user_message(&build_context(chunks), question);
    let request = create_chat_request(model, user_message)?;

    let response = client.chat().create(request).await?;
    process_response(response)
}

/// Maps one streamed chat event to the answer fragment it carries. Events
/// without a content delta (role announcements, the final stop event)
/// yield an empty fragment; transport errors surface as [`AppError`].
fn stream_fragment(
    item: Result<CreateChatCompletionStreamResponse, OpenAIError>,
) -> Result<String, AppError> {
    match item {
        Ok(response) => Ok(response
            .choices
            .first()
            .and_then(|choice| choice.delta.content.clone())
            .unwrap_or_default()),
        Err(err) => Err(AppError::OpenAI(err)),
    }
}

/// Streaming variant of [`generate_answer`], yielding answer fragments as
/// the model produces them.
pub async fn generate_answer_stream(
    client: &Client<async_openai::config::OpenAIConfig>,
    model: &str,
    chunks: &[RetrievedChunk],
    question: &str,
) -> Result<impl Stream<Item = Result<String, AppError>>, AppError> {
    let user_message = create_user_message(&build_context(chunks), question);
    let request = create_chat_request(model, user_message)?;

    let stream = client.chat().create_stream(request).await?;

    Ok(stream.map(stream_fragment))
}
