// Domain-level entities and the inbound/outbound shapes of the control core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-assigned player identifier.
pub type PlayerId = u64;

/// Upper bound for `MAX_TEAMS`; one chat letter per team.
pub const MAX_TEAMS: u8 = 4;

// Team letters in index order: blue, red, green, yellow.
const TEAM_LETTERS: [char; MAX_TEAMS as usize] = ['b', 'r', 'g', 'y'];

/// Maps a team letter (case-insensitive) to its index.
pub fn team_from_letter(letter: &str) -> Option<u8> {
    let mut chars = letter.chars();
    let c = chars.next()?.to_ascii_lowercase();
    if chars.next().is_some() {
        return None;
    }
    TEAM_LETTERS.iter().position(|l| *l == c).map(|i| i as u8)
}

/// Returns the chat letter for a team index.
pub fn team_letter(team: u8) -> Option<char> {
    TEAM_LETTERS.get(team as usize).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub ping_ms: u32,
    // None until assigned; always < configured MAX_TEAMS.
    pub team: Option<u8>,
    /// Extra identity used to key ranking when authentication is on.
    pub rank_identity: Option<String>,
    pub admin: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: String) -> Self {
        Self {
            id,
            name,
            ping_ms: 0,
            team: None,
            rank_identity: None,
            admin: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundPhase {
    Lobby,
    WeaponSelection,
    InRound,
    PostRound,
    Quit,
}

impl RoundPhase {
    /// Legal edges: the lobby cycle in order, or any live phase to Quit.
    pub fn can_transition_to(self, next: RoundPhase) -> bool {
        use RoundPhase::*;
        matches!(
            (self, next),
            (Lobby, WeaponSelection)
                | (WeaponSelection, InRound)
                | (InRound, PostRound)
                | (PostRound, Lobby)
                | (Lobby | WeaponSelection | InRound | PostRound, Quit)
        )
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::Lobby => "lobby",
            RoundPhase::WeaponSelection => "weapon_selection",
            RoundPhase::InRound => "in_round",
            RoundPhase::PostRound => "post_round",
            RoundPhase::Quit => "quit",
        };
        f.write_str(name)
    }
}

/// A game option value forwarded verbatim to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl OptionValue {
    /// Parses a chat argument into the narrowest matching value.
    pub fn parse(raw: &str) -> Self {
        if let Ok(value) = raw.parse::<i64>() {
            return OptionValue::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            return OptionValue::Float(value);
        }
        match raw.to_ascii_lowercase().as_str() {
            "true" => OptionValue::Bool(true),
            "false" => OptionValue::Bool(false),
            _ => OptionValue::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundEndReason {
    MaxKills,
    TimeLimit,
    Aborted,
    Other,
}

/// Discrete inbound events delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Chat {
        sender_id: PlayerId,
        text: String,
    },
    PlayerJoin {
        player_id: PlayerId,
        name: String,
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
        killer_id: Option<PlayerId>,
    },
    WeaponsReady,
    RoundEnd {
        reason: RoundEndReason,
    },
    Tick,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanDuration {
    Minutes(u32),
    Permanent,
}

/// Discrete outbound actions requested of the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Broadcast { text: String },
    Whisper { player_id: PlayerId, text: String },
    Kick { player_id: PlayerId, reason: String },
    Ban { player_id: PlayerId, duration: BanDuration },
    SetOption { name: String, value: OptionValue },
    SetTeam { player_id: PlayerId, team: u8 },
    LoadLevel { name: String },
    LoadPreset { name: String },
    StartRound,
    EndRound,
}

impl Command {
    pub fn broadcast(text: impl Into<String>) -> Self {
        Command::Broadcast { text: text.into() }
    }

    pub fn whisper(player_id: PlayerId, text: impl Into<String>) -> Self {
        Command::Whisper {
            player_id,
            text: text.into(),
        }
    }

    pub fn set_option(name: impl Into<String>, value: OptionValue) -> Self {
        Command::SetOption {
            name: name.into(),
            value,
        }
    }
}
