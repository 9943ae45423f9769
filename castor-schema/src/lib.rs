pub mod assist;
pub mod gemini;
pub mod openai;

pub use assist::{AssistEnvelope, AssistEnvelopeMeta, AssistResponseBody};
pub use gemini::{
    Candidate, Content, GeminiModel, GeminiModelList, GeminiResponseBody, GenerateContentRequest,
    GenerationConfig, InlineData, Part, SafetySetting, ThinkingConfig,
};
pub use openai::{
    ChatChoice, ChatChunk, ChatChunkChoice, ChatDelta, ChatMessage, ChatRequest, ChatResponse,
    ChatUsage, MessageContent, MessagePart, OpenaiModel, OpenaiModelList,
};
