mod core;
mod history;
mod state;
mod streaming;


pub use state::{ChatPanel, PanelError, PanelUpdate};
pub use streaming::{TurnAccumulator, TurnOutcome, TurnPhase, TurnStep};
