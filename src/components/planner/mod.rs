mod gateway;
mod prompt;

pub use gateway::{GeminiGateway, PlannerError, PlannerModel};
pub use prompt::{compose_conversation, ModelPart, ModelTurn, HISTORY_WINDOW};
