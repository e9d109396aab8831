mod handler;
mod protocol;
pub mod session;

pub use handler::{handle_text_frame, router, FrameOutcome, WsState};
pub use session::{Outbound, Session, SessionTable};
