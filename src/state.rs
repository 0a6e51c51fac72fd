mod conversation;
mod message;
mod timeline;

pub use conversation::{
    ChatPanel, PanelError, PanelUpdate, TurnAccumulator, TurnOutcome, TurnPhase, TurnStep,
};
pub use message::{Message, TurnId, TurnTarget, WELCOME_MESSAGE_ID};
pub use timeline::Timeline;
