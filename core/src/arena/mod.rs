pub mod arbitration;
pub mod broadcast;
pub mod dispatch;
pub mod session;

pub use arbitration::{ArbitrationReport, StoredWinnerLog, WinnerLog, WinnerRecord};
pub use broadcast::{Arena, ArenaView, SendReport, RELOAD_DELAY};
pub use dispatch::{Dispatch, DispatchOutcome, HttpDispatchClient};
pub use session::{SessionController, SessionPhase, SessionView};
