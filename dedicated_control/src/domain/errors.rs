// Domain-level errors for control workflows.

use super::entities::PlayerId;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    ConfigMissingKey(&'static str),
    InvalidCommand(String),
    AdminAuthFailed,
    VoteAlreadyActive,
    NoActiveVote,
    AlreadyVoted,
    NotEligibleToVote,
    VoteTargetCoolingDown { remaining: Duration },
    VotingDisabled,
    UnknownPlayer(PlayerId),
    TeamChangeDisabled,
    TeamUnavailable(String),
    RankingDisabled,
    ServerFull,
    IllegalTransition,
    HostCommandFailed(String),
}

// Rendered text doubles as the notice sent to the triggering player.
impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::ConfigMissingKey(key) => {
                write!(f, "config key {key} missing, using default")
            }
            ControlError::InvalidCommand(detail) => {
                write!(f, "Command not recognized: {detail}")
            }
            ControlError::AdminAuthFailed => f.write_str("Command rejected"),
            ControlError::VoteAlreadyActive => f.write_str("Another vote is already running"),
            ControlError::NoActiveVote => f.write_str("There is no vote running"),
            ControlError::AlreadyVoted => f.write_str("You already voted"),
            ControlError::NotEligibleToVote => f.write_str("You cannot vote on this"),
            ControlError::VoteTargetCoolingDown { remaining } => write!(
                f,
                "That player was recently vote-kicked, try again in {} minute(s)",
                minutes_ceil(*remaining)
            ),
            ControlError::VotingDisabled => f.write_str("Voting is disabled on this server"),
            ControlError::UnknownPlayer(id) => write!(f, "No player with id {id}"),
            ControlError::TeamChangeDisabled => {
                f.write_str("Team change is disabled on this server")
            }
            ControlError::TeamUnavailable(team) => write!(f, "Team {team} is not available"),
            ControlError::RankingDisabled => f.write_str("Ranking is disabled on this server"),
            ControlError::ServerFull => f.write_str("Server is full"),
            ControlError::IllegalTransition => f.write_str("Not possible right now"),
            ControlError::HostCommandFailed(detail) => {
                write!(f, "host command failed: {detail}")
            }
        }
    }
}

/// Whole minutes, rounded up, for player-facing messages.
pub fn minutes_ceil(duration: Duration) -> u64 {
    duration.as_secs().div_ceil(60).max(1)
}
