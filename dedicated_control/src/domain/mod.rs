// Domain layer: core control types and rules.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod settings;

pub use entities::{
    BanDuration, Command, OptionValue, Player, PlayerId, RoundEndReason, RoundPhase, Signal,
};
pub use errors::ControlError;
pub use ports::RandomSource;
pub use settings::ServerConfig;
