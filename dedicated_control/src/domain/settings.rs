// Immutable snapshot of the game tunables consumed by the control core.

use super::entities::{MAX_TEAMS, OptionValue, team_letter};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Keys recognized in the config file, in the order they are documented.
pub const CONFIG_KEYS: &[&str] = &[
    "ADMIN_PASSWORD",
    "ADMIN_PREFIX",
    "USER_PREFIX",
    "MIN_PLAYERS",
    "MIN_PLAYERS_TEAMS",
    "MAX_TEAMS",
    "MAX_PLAYERS",
    "TOO_FEW_PLAYERS_MESSAGE",
    "WAIT_BEFORE_SPAMMING_TOO_FEW_PLAYERS_MESSAGE",
    "PRESET_TIMEOUT",
    "WAIT_AFTER_GAME",
    "WAIT_BEFORE_GAME",
    "WAIT_BEFORE_GAME_MESSAGE",
    "GAME_LIVES",
    "GAME_MAX_KILLS",
    "GAME_MAX_TIME",
    "WEAPON_SELECTION_TIME",
    "MAX_PING",
    "PING_CHECK_INTERVAL",
    "ALLOW_TEAM_CHANGE",
    "TEAM_CHANGE_MESSAGE",
    "RANKING",
    "RANKING_AUTHENTICATION",
    "VOTING",
    "VOTING_PERCENT",
    "VOTING_TIME",
    "VOTING_COUNT_NEGATIVE",
    "VOTING_KICK_TIME",
    "LEVELS",
    "PRESETS",
    "PRESET_OPTIONS",
    "GLOBAL_SETTINGS",
];

/// Round limit value meaning "no limit".
pub const UNLIMITED: i64 = -2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ServerConfig {
    pub admin_password: String,
    pub admin_prefix: String,
    /// Falls back to the admin prefix when unset.
    pub user_prefix: Option<String>,

    pub min_players: usize,
    pub min_players_teams: usize,
    pub max_teams: u8,
    pub max_players: usize,

    /// Placeholders: `{min_players}`, `{min_players_teams}`.
    pub too_few_players_message: String,
    pub wait_before_spamming_too_few_players_message: u64,
    pub preset_timeout: u64,
    pub wait_after_game: u64,
    pub wait_before_game: u64,
    /// Placeholder: `{seconds}`.
    pub wait_before_game_message: String,

    pub game_lives: i64,
    pub game_max_kills: i64,
    /// Minutes.
    pub game_max_time: i64,
    pub weapon_selection_time: u64,

    pub max_ping: i64,
    pub ping_check_interval: u64,

    pub allow_team_change: bool,
    /// Placeholders: `{prefix}`, `{teams}`.
    pub team_change_message: String,

    pub ranking: bool,
    pub ranking_authentication: bool,

    pub voting: bool,
    pub voting_percent: u32,
    pub voting_time: u64,
    pub voting_count_negative: bool,
    /// Minutes.
    pub voting_kick_time: u64,

    pub levels: Vec<String>,
    pub presets: Vec<String>,
    pub preset_options: BTreeMap<String, BTreeMap<String, OptionValue>>,
    pub global_settings: BTreeMap<String, OptionValue>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_password: "secret".to_string(),
            admin_prefix: "!".to_string(),
            user_prefix: None,
            min_players: 2,
            min_players_teams: 4,
            max_teams: 2,
            max_players: 8,
            too_few_players_message: "Game will start with minimum {min_players} players. \
                Team Deathmatch if there's {min_players_teams} or more players"
                .to_string(),
            wait_before_spamming_too_few_players_message: 30,
            preset_timeout: 300,
            wait_after_game: 10,
            wait_before_game: 15,
            wait_before_game_message: "Game will start in {seconds} seconds".to_string(),
            game_lives: UNLIMITED,
            game_max_kills: 15,
            game_max_time: 7,
            weapon_selection_time: 40,
            max_ping: 800,
            ping_check_interval: 10,
            allow_team_change: true,
            team_change_message: "Set your team with {prefix}team {teams}".to_string(),
            ranking: true,
            ranking_authentication: false,
            voting: true,
            voting_percent: 51,
            voting_time: 15,
            voting_count_negative: true,
            voting_kick_time: 5,
            levels: Vec::new(),
            presets: Vec::new(),
            preset_options: BTreeMap::new(),
            global_settings: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn user_prefix(&self) -> &str {
        self.user_prefix.as_deref().unwrap_or(&self.admin_prefix)
    }

    /// Team count clamped to the number of team letters.
    pub fn team_count(&self) -> u8 {
        self.max_teams.clamp(1, MAX_TEAMS)
    }

    pub fn too_few_players_text(&self) -> String {
        self.too_few_players_message
            .replace("{min_players}", &self.min_players.to_string())
            .replace("{min_players_teams}", &self.min_players_teams.to_string())
    }

    pub fn wait_before_game_text(&self) -> String {
        self.wait_before_game_message
            .replace("{seconds}", &self.wait_before_game.to_string())
    }

    pub fn team_change_text(&self) -> String {
        let teams: Vec<String> = (0..self.team_count())
            .filter_map(team_letter)
            .map(String::from)
            .collect();
        self.team_change_message
            .replace("{prefix}", self.user_prefix())
            .replace("{teams}", &teams.join("/"))
    }

    pub fn too_few_players_wait(&self) -> Duration {
        Duration::from_secs(self.wait_before_spamming_too_few_players_message)
    }

    pub fn preset_rotation(&self) -> Duration {
        Duration::from_secs(self.preset_timeout)
    }

    pub fn post_game_pause(&self) -> Duration {
        Duration::from_secs(self.wait_after_game)
    }

    pub fn pre_game_countdown(&self) -> Duration {
        Duration::from_secs(self.wait_before_game)
    }

    pub fn weapon_selection(&self) -> Duration {
        Duration::from_secs(self.weapon_selection_time)
    }

    /// None when the round has no time limit.
    pub fn round_time_limit(&self) -> Option<Duration> {
        u64::try_from(self.game_max_time)
            .ok()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// None when ping kicking is disabled.
    pub fn ping_limit(&self) -> Option<u32> {
        u32::try_from(self.max_ping).ok().filter(|ping| *ping > 0)
    }

    pub fn ping_check(&self) -> Duration {
        Duration::from_secs(self.ping_check_interval)
    }

    pub fn vote_window(&self) -> Duration {
        Duration::from_secs(self.voting_time)
    }

    pub fn vote_kick_cooldown(&self) -> Duration {
        Duration::from_secs(self.voting_kick_time.saturating_mul(60))
    }

    /// Overrides for a preset; empty when the preset has none configured.
    pub fn preset_overrides(&self, preset: &str) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.preset_options.get(preset).into_iter().flatten()
    }
}
