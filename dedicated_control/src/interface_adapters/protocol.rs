// Wire protocol DTOs and conversions for the host engine link.
// One JSON object per line in each direction.

use crate::domain::{
    BanDuration, Command, OptionValue, PlayerId, RoundEndReason, Signal,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Signals the host engine sends to the controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum HostSignal {
    Chat {
        sender_id: PlayerId,
        text: String,
    },
    PlayerJoin {
        player_id: PlayerId,
        name: String,
        #[serde(default)]
        rank_identity: Option<String>,
    },
    PlayerLeave {
        player_id: PlayerId,
    },
    PlayerPing {
        player_id: PlayerId,
        ping_ms: u32,
    },
    PlayerDied {
        victim_id: PlayerId,
        #[serde(default)]
        killer_id: Option<PlayerId>,
    },
    WeaponsReady,
    RoundEnd {
        reason: RoundEndReason,
    },
    Tick {
        elapsed_seconds: f64,
    },
    Shutdown,
}

/// Commands the controller sends to the host engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum HostCommand {
    Broadcast {
        text: String,
    },
    Whisper {
        player_id: PlayerId,
        text: String,
    },
    Kick {
        player_id: PlayerId,
        reason: String,
    },
    Ban {
        player_id: PlayerId,
        // Absent means permanent.
        #[serde(skip_serializing_if = "Option::is_none")]
        minutes: Option<u32>,
    },
    SetOption {
        name: String,
        value: OptionValue,
    },
    SetTeam {
        player_id: PlayerId,
        team: u8,
    },
    LoadLevel {
        name: String,
    },
    LoadPreset {
        name: String,
    },
    StartRound,
    EndRound,
}

#[derive(Debug)]
pub enum ProtocolError {
    Malformed(serde_json::Error),
    InvalidElapsed(f64),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(e) => write!(f, "malformed signal: {e}"),
            ProtocolError::InvalidElapsed(secs) => write!(f, "invalid tick elapsed time: {secs}"),
        }
    }
}

impl HostSignal {
    /// Splits a wire signal into the core signal and the time it carries.
    pub fn into_signal(self) -> Result<(Signal, Duration), ProtocolError> {
        let signal = match self {
            HostSignal::Chat { sender_id, text } => Signal::Chat { sender_id, text },
            HostSignal::PlayerJoin {
                player_id,
                name,
                rank_identity,
            } => Signal::PlayerJoin {
                player_id,
                name,
                rank_identity,
            },
            HostSignal::PlayerLeave { player_id } => Signal::PlayerLeave { player_id },
            HostSignal::PlayerPing { player_id, ping_ms } => {
                Signal::PlayerPing { player_id, ping_ms }
            }
            HostSignal::PlayerDied {
                victim_id,
                killer_id,
            } => Signal::PlayerDied {
                victim_id,
                killer_id,
            },
            HostSignal::WeaponsReady => Signal::WeaponsReady,
            HostSignal::RoundEnd { reason } => Signal::RoundEnd { reason },
            HostSignal::Tick { elapsed_seconds } => {
                let elapsed = Duration::try_from_secs_f64(elapsed_seconds)
                    .map_err(|_| ProtocolError::InvalidElapsed(elapsed_seconds))?;
                return Ok((Signal::Tick, elapsed));
            }
            HostSignal::Shutdown => Signal::Shutdown,
        };
        Ok((signal, Duration::ZERO))
    }
}

impl From<Command> for HostCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Broadcast { text } => HostCommand::Broadcast { text },
            Command::Whisper { player_id, text } => HostCommand::Whisper { player_id, text },
            Command::Kick { player_id, reason } => HostCommand::Kick { player_id, reason },
            Command::Ban {
                player_id,
                duration,
            } => HostCommand::Ban {
                player_id,
                minutes: match duration {
                    BanDuration::Minutes(minutes) => Some(minutes),
                    BanDuration::Permanent => None,
                },
            },
            Command::SetOption { name, value } => HostCommand::SetOption { name, value },
            Command::SetTeam { player_id, team } => HostCommand::SetTeam { player_id, team },
            Command::LoadLevel { name } => HostCommand::LoadLevel { name },
            Command::LoadPreset { name } => HostCommand::LoadPreset { name },
            Command::StartRound => HostCommand::StartRound,
            Command::EndRound => HostCommand::EndRound,
        }
    }
}

/// Decodes one inbound line.
pub fn decode_signal(line: &str) -> Result<(Signal, Duration), ProtocolError> {
    serde_json::from_str::<HostSignal>(line)
        .map_err(ProtocolError::Malformed)?
        .into_signal()
}

/// Encodes one outbound command, without the trailing newline.
pub fn encode_command(command: Command) -> Result<String, serde_json::Error> {
    serde_json::to_string(&HostCommand::from(command))
}
