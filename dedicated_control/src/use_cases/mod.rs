// Use cases layer: the control core's decision logic.

pub mod commands;
pub mod control;
pub mod ranking;
pub mod timers;
pub mod vote;

pub use commands::{AdminCommand, ChatLine, CommandParser, UserCommand, VoteRequest};
pub use control::Controller;
pub use timers::{TimerName, TimerRegistry};
pub use vote::{VoteChoice, VoteEngine, VoteOutcome, VoteRules, VoteSubject};
