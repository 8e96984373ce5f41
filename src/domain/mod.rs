pub mod achievement;
pub mod aggregate;
pub mod completion;
pub mod event;
pub mod leaderboard;
pub mod level;
pub mod period;
pub mod scope;
pub mod state;

pub use achievement::*;
pub use aggregate::*;
pub use completion::*;
pub use event::*;
pub use leaderboard::*;
pub use level::*;
pub use period::*;
pub use scope::*;
pub use state::*;
