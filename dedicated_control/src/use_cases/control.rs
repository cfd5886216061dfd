// Round state machine: consumes host signals and emits host commands.

use super::commands::{AdminCommand, ChatLine, CommandParser, USER_HELP, UserCommand, VoteRequest};
use super::ranking::Ranking;
use super::timers::{TimerName, TimerRegistry};
use super::vote::{Vote, VoteChoice, VoteEngine, VoteOutcome, VoteRules, VoteSubject};
use crate::domain::entities::team_letter;
use crate::domain::errors::minutes_ceil;
use crate::domain::{
    BanDuration, Command, ControlError, OptionValue, Player, PlayerId, RandomSource,
    RoundEndReason, RoundPhase, ServerConfig, Signal,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const GAME_TYPE_OPTION: &str = "GameOptions.GameInfo.GameType";
pub const LIVES_OPTION: &str = "GameOptions.GameInfo.Lives";
pub const KILL_LIMIT_OPTION: &str = "GameOptions.GameInfo.KillLimit";
pub const TIME_LIMIT_OPTION: &str = "GameOptions.GameInfo.TimeLimit";
pub const LOADING_TIME_OPTION: &str = "GameOptions.GameInfo.LoadingTime";

const DEATHMATCH: i64 = 0;
const TEAM_DEATHMATCH: i64 = 1;
const TOP_RANK_COUNT: usize = 5;
const GAME_STARTING_TEXT: &str = "Game is starting, pick your weapons";

/// Top-level controller for one hosted server.
///
/// Signals are handled strictly one at a time; all timing comes from the
/// elapsed time passed with each signal, so a given sequence of
/// `(signal, elapsed)` pairs always yields the same commands.
pub struct Controller<R> {
    config: Arc<ServerConfig>,
    rng: R,
    parser: CommandParser,
    phase: RoundPhase,
    // Edges taken while handling the current signal.
    transitions: Vec<(RoundPhase, RoundPhase)>,
    booted: bool,
    players: BTreeMap<PlayerId, Player>,
    timers: TimerRegistry,
    votes: VoteEngine,
    ranking: Ranking,
    current_preset: Option<String>,
    current_level: Option<String>,
    // Changes requested mid-round, applied on the next lobby entry.
    pending_preset: Option<String>,
    pending_level: Option<String>,
    rotation_due: bool,
    team_mode: bool,
    // Players above the ping limit at the previous check.
    ping_flagged: BTreeSet<PlayerId>,
}

impl<R: RandomSource> Controller<R> {
    pub fn new(config: Arc<ServerConfig>, rng: R) -> Self {
        let votes = VoteEngine::new(VoteRules {
            percent: config.voting_percent,
            count_negative: config.voting_count_negative,
        });
        Self {
            parser: CommandParser::new(&config),
            config,
            rng,
            phase: RoundPhase::Lobby,
            transitions: Vec::new(),
            booted: false,
            players: BTreeMap::new(),
            timers: TimerRegistry::new(),
            votes,
            ranking: Ranking::new(),
            current_preset: None,
            current_level: None,
            pending_preset: None,
            pending_level: None,
            rotation_due: false,
            team_mode: false,
            ping_flagged: BTreeSet::new(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Phase edges taken by the most recent `handle_signal` call, in order.
    pub fn last_transitions(&self) -> &[(RoundPhase, RoundPhase)] {
        &self.transitions
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn active_vote(&self) -> Option<&Vote> {
        self.votes.active()
    }

    pub fn current_preset(&self) -> Option<&str> {
        self.current_preset.as_deref()
    }

    pub fn current_level(&self) -> Option<&str> {
        self.current_level.as_deref()
    }

    pub fn team_mode(&self) -> bool {
        self.team_mode
    }

    /// The single entry point: advance time by `elapsed`, then handle `signal`.
    pub fn handle_signal(&mut self, signal: Signal, elapsed: Duration) -> Vec<Command> {
        let mut out = Vec::new();
        self.transitions.clear();
        if self.phase == RoundPhase::Quit {
            debug!(?signal, "signal after quit ignored");
            return out;
        }
        if !self.booted {
            self.boot(&mut out);
        }
        self.advance(elapsed, &mut out);

        match signal {
            Signal::Chat { sender_id, text } => self.on_chat(sender_id, &text, &mut out),
            Signal::PlayerJoin {
                player_id,
                name,
                rank_identity,
            } => self.on_join(player_id, name, rank_identity, &mut out),
            Signal::PlayerLeave { player_id } => self.on_leave(player_id, &mut out),
            Signal::PlayerPing { player_id, ping_ms } => match self.players.get_mut(&player_id) {
                Some(player) => player.ping_ms = ping_ms,
                None => warn!(player_id, error = ?ControlError::UnknownPlayer(player_id), "ping for unknown player"),
            },
            Signal::PlayerDied {
                victim_id,
                killer_id,
            } => self.on_death(victim_id, killer_id),
            Signal::WeaponsReady => {
                if self.phase == RoundPhase::WeaponSelection {
                    self.enter_in_round(&mut out);
                }
            }
            Signal::RoundEnd { reason } => self.on_round_end(reason, &mut out),
            Signal::Tick => self.check_population(&mut out),
            Signal::Shutdown => self.shutdown(&mut out),
        }
        out
    }

    fn boot(&mut self, out: &mut Vec<Command>) {
        self.booted = true;
        let config = Arc::clone(&self.config);

        for (name, value) in &config.global_settings {
            out.push(Command::set_option(name.as_str(), value.clone()));
        }
        if let Some(preset) = pick_rotation(&mut self.rng, &config.presets, None) {
            self.load_preset(preset, out);
        }
        if let Some(level) = pick_rotation(&mut self.rng, &config.levels, None) {
            self.load_level(level, out);
        }
        self.arm_rotation();

        info!(
            presets = config.presets.len(),
            levels = config.levels.len(),
            "dedicated control started"
        );
        self.check_population(out);
    }

    fn advance(&mut self, elapsed: Duration, out: &mut Vec<Command>) {
        if elapsed.is_zero() {
            return;
        }
        self.votes.advance(elapsed);
        for name in self.timers.tick(elapsed) {
            self.on_timer(name, out);
        }
    }

    fn on_timer(&mut self, name: TimerName, out: &mut Vec<Command>) {
        debug!(timer = ?name, phase = %self.phase, "timer fired");
        match name {
            TimerName::TooFewPlayers => {
                let waiting = self.players.len();
                if self.phase == RoundPhase::Lobby && waiting > 0 && waiting < self.config.min_players {
                    out.push(Command::broadcast(self.config.too_few_players_text()));
                    self.timers
                        .arm(TimerName::TooFewPlayers, self.config.too_few_players_wait());
                }
            }
            TimerName::PreGame => {
                if self.phase == RoundPhase::Lobby {
                    if self.players.len() >= self.config.min_players {
                        out.push(Command::broadcast(GAME_STARTING_TEXT));
                        self.start_weapon_selection(out);
                    } else {
                        self.check_population(out);
                    }
                }
            }
            TimerName::WeaponSelection => {
                if self.phase == RoundPhase::WeaponSelection {
                    self.enter_in_round(out);
                }
            }
            TimerName::RoundTime => {
                if self.phase == RoundPhase::InRound {
                    info!("round time limit reached");
                    out.push(Command::EndRound);
                    self.enter_post_round(out);
                }
            }
            TimerName::PingCheck => {
                if self.phase == RoundPhase::InRound {
                    self.check_pings(out);
                    self.timers.arm(TimerName::PingCheck, self.config.ping_check());
                }
            }
            TimerName::PostGame => {
                if self.phase == RoundPhase::PostRound {
                    self.enter_lobby(out);
                }
            }
            TimerName::PresetRotation => {
                info!("preset rotation due at next lobby");
                self.rotation_due = true;
            }
            TimerName::VoteWindow => self.finish_vote(out),
        }
    }

    fn transition(&mut self, next: RoundPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            error!(from = %self.phase, to = %next, error = ?ControlError::IllegalTransition, "phase change refused");
            return false;
        }
        info!(from = %self.phase, to = %next, players = self.players.len(), "phase changed");
        self.transitions.push((self.phase, next));
        self.phase = next;
        true
    }

    fn check_population(&mut self, out: &mut Vec<Command>) {
        if self.phase != RoundPhase::Lobby {
            return;
        }
        let count = self.players.len();
        self.update_team_mode(count, out);

        if count < self.config.min_players {
            if self.timers.is_armed(TimerName::PreGame) {
                info!(players = count, "not enough players, countdown stopped");
                self.timers.disarm(TimerName::PreGame);
            }
            // The reminder period starts with the first waiting player.
            if count == 0 {
                self.timers.disarm(TimerName::TooFewPlayers);
            } else if !self.timers.is_armed(TimerName::TooFewPlayers) {
                self.timers
                    .arm(TimerName::TooFewPlayers, self.config.too_few_players_wait());
            }
            return;
        }

        self.timers.disarm(TimerName::TooFewPlayers);
        if !self.timers.is_armed(TimerName::PreGame) {
            self.timers
                .arm(TimerName::PreGame, self.config.pre_game_countdown());
            out.push(Command::broadcast(self.config.wait_before_game_text()));
        }
    }

    // Team mode follows population in both directions, lobby only.
    fn update_team_mode(&mut self, count: usize, out: &mut Vec<Command>) {
        let wanted = self.config.team_count() > 1 && count >= self.config.min_players_teams;
        if wanted == self.team_mode {
            return;
        }
        self.team_mode = wanted;
        info!(team_mode = wanted, players = count, "game type switched");

        let game_type = if wanted { TEAM_DEATHMATCH } else { DEATHMATCH };
        out.push(Command::set_option(GAME_TYPE_OPTION, OptionValue::Int(game_type)));

        if wanted {
            self.balance_teams(out);
            if self.config.allow_team_change {
                out.push(Command::broadcast(self.config.team_change_text()));
            }
        } else {
            for player in self.players.values_mut() {
                player.team = None;
            }
        }
    }

    fn balance_teams(&mut self, out: &mut Vec<Command>) {
        let team_count = self.config.team_count();
        for (index, player) in self.players.values_mut().enumerate() {
            let team = (index % team_count as usize) as u8;
            player.team = Some(team);
            out.push(Command::SetTeam {
                player_id: player.id,
                team,
            });
        }
    }

    fn smallest_team(&self) -> u8 {
        (0..self.config.team_count())
            .min_by_key(|team| {
                self.players
                    .values()
                    .filter(|player| player.team == Some(*team))
                    .count()
            })
            .unwrap_or(0)
    }

    fn start_weapon_selection(&mut self, out: &mut Vec<Command>) {
        if !self.transition(RoundPhase::WeaponSelection) {
            return;
        }
        self.timers.disarm(TimerName::TooFewPlayers);
        self.timers.disarm(TimerName::PreGame);

        out.push(Command::set_option(
            LIVES_OPTION,
            OptionValue::Int(self.config.game_lives),
        ));
        out.push(Command::set_option(
            KILL_LIMIT_OPTION,
            OptionValue::Int(self.config.game_max_kills),
        ));
        out.push(Command::set_option(
            TIME_LIMIT_OPTION,
            OptionValue::Int(self.config.game_max_time),
        ));
        out.push(Command::StartRound);
        self.timers
            .arm(TimerName::WeaponSelection, self.config.weapon_selection());
    }

    fn enter_in_round(&mut self, out: &mut Vec<Command>) {
        if !self.transition(RoundPhase::InRound) {
            return;
        }
        self.timers.disarm(TimerName::WeaponSelection);

        let config = Arc::clone(&self.config);
        if let Some(preset) = self.current_preset.as_deref() {
            for (name, value) in config.preset_overrides(preset) {
                out.push(Command::set_option(name.as_str(), value.clone()));
            }
        }

        self.ranking.start_round();
        self.ping_flagged.clear();
        if let Some(limit) = config.round_time_limit() {
            self.timers.arm(TimerName::RoundTime, limit);
        }
        if config.ping_limit().is_some() {
            self.timers.arm(TimerName::PingCheck, config.ping_check());
        }
    }

    fn enter_post_round(&mut self, out: &mut Vec<Command>) {
        if !self.transition(RoundPhase::PostRound) {
            return;
        }
        self.timers.disarm(TimerName::RoundTime);
        self.timers.disarm(TimerName::PingCheck);
        self.ping_flagged.clear();

        let results = match self.ranking.round_leader() {
            Some((leader, kills)) => {
                format!("Round over! Best player: {leader} with {kills} kill(s)")
            }
            None => "Round over!".to_string(),
        };
        out.push(Command::broadcast(results));
        self.timers
            .arm(TimerName::PostGame, self.config.post_game_pause());
    }

    fn enter_lobby(&mut self, out: &mut Vec<Command>) {
        if !self.transition(RoundPhase::Lobby) {
            return;
        }
        self.refresh_rotation(out);
        self.check_population(out);
    }

    // Applies pending changes, then rotation picks for whatever is not pending.
    fn refresh_rotation(&mut self, out: &mut Vec<Command>) {
        let config = Arc::clone(&self.config);
        let rotate = std::mem::take(&mut self.rotation_due);

        let preset = match self.pending_preset.take() {
            Some(preset) => Some(preset),
            None if rotate => pick_rotation(
                &mut self.rng,
                &config.presets,
                self.current_preset.as_deref(),
            ),
            None => None,
        };
        if let Some(preset) = preset {
            self.load_preset(preset, out);
        }

        let level = match self.pending_level.take() {
            Some(level) => Some(level),
            None if rotate => pick_rotation(
                &mut self.rng,
                &config.levels,
                self.current_level.as_deref(),
            ),
            None => None,
        };
        if let Some(level) = level {
            self.load_level(level, out);
        }

        if rotate {
            self.arm_rotation();
        }
    }

    fn arm_rotation(&mut self) {
        if !self.config.presets.is_empty() || !self.config.levels.is_empty() {
            self.timers
                .arm(TimerName::PresetRotation, self.config.preset_rotation());
        }
    }

    fn load_preset(&mut self, preset: String, out: &mut Vec<Command>) {
        info!(preset = %preset, "loading preset");
        out.push(Command::LoadPreset {
            name: preset.clone(),
        });
        self.current_preset = Some(preset);
    }

    fn load_level(&mut self, level: String, out: &mut Vec<Command>) {
        info!(level = %level, "loading level");
        out.push(Command::LoadLevel {
            name: level.clone(),
        });
        self.current_level = Some(level);
    }

    fn schedule_preset(&mut self, preset: String, out: &mut Vec<Command>) {
        if self.phase == RoundPhase::Lobby {
            self.load_preset(preset, out);
        } else {
            out.push(Command::broadcast(format!(
                "Preset {preset} will be used next round"
            )));
            self.pending_preset = Some(preset);
        }
    }

    fn schedule_level(&mut self, level: String, out: &mut Vec<Command>) {
        if self.phase == RoundPhase::Lobby {
            self.load_level(level, out);
        } else {
            out.push(Command::broadcast(format!(
                "Map {level} will be loaded next round"
            )));
            self.pending_level = Some(level);
        }
    }

    fn on_round_end(&mut self, reason: RoundEndReason, out: &mut Vec<Command>) {
        info!(?reason, phase = %self.phase, "round end signalled");
        match self.phase {
            RoundPhase::InRound => self.enter_post_round(out),
            // Host ended the game before weapons were picked; walk the graph.
            RoundPhase::WeaponSelection => {
                self.enter_in_round(out);
                self.enter_post_round(out);
            }
            _ => debug!("round end outside of a round ignored"),
        }
    }

    fn shutdown(&mut self, out: &mut Vec<Command>) {
        if matches!(
            self.phase,
            RoundPhase::WeaponSelection | RoundPhase::InRound
        ) {
            out.push(Command::EndRound);
        }
        self.votes.cancel();
        if self.transition(RoundPhase::Quit) {
            self.timers = TimerRegistry::new();
            info!("dedicated control stopped");
        }
    }

    fn rank_key(&self, player: &Player) -> String {
        match (&player.rank_identity, self.config.ranking_authentication) {
            (Some(identity), true) => format!("{}#{identity}", player.name),
            _ => player.name.clone(),
        }
    }

    fn on_join(
        &mut self,
        player_id: PlayerId,
        name: String,
        rank_identity: Option<String>,
        out: &mut Vec<Command>,
    ) {
        if self.players.contains_key(&player_id) {
            warn!(player_id, "duplicate join ignored");
            return;
        }

        let cooldown = self
            .votes
            .cooldown_remaining(player_id)
            .or_else(|| self.votes.cooldown_remaining_for_name(&name));
        if let Some(remaining) = cooldown {
            info!(player_id, name = %name, "vote-kicked player rejoined, kicking again");
            out.push(Command::Kick {
                player_id,
                reason: format!(
                    "You were kicked by vote, come back in {} minute(s)",
                    minutes_ceil(remaining)
                ),
            });
            return;
        }

        if self.players.len() >= self.config.max_players {
            warn!(player_id, name = %name, max = self.config.max_players, "server full");
            out.push(Command::Kick {
                player_id,
                reason: ControlError::ServerFull.to_string(),
            });
            return;
        }

        let mut player = Player::new(player_id, name);
        player.rank_identity = rank_identity;
        if self.team_mode {
            let team = self.smallest_team();
            player.team = Some(team);
            out.push(Command::SetTeam { player_id, team });
        }
        if self.config.ranking {
            let key = self.rank_key(&player);
            self.ranking.register(&key);
        }
        info!(player_id, name = %player.name, players = self.players.len() + 1, "player joined");
        self.players.insert(player_id, player);

        if self.team_mode && self.config.allow_team_change {
            out.push(Command::whisper(player_id, self.config.team_change_text()));
        }
        self.check_population(out);
    }

    fn on_leave(&mut self, player_id: PlayerId, out: &mut Vec<Command>) {
        let Some(player) = self.players.remove(&player_id) else {
            warn!(player_id, error = ?ControlError::UnknownPlayer(player_id), "leave for unknown player");
            return;
        };
        info!(player_id, name = %player.name, players = self.players.len(), "player left");
        self.ping_flagged.remove(&player_id);

        let target_left = matches!(
            self.votes.active().map(|vote| &vote.subject),
            Some(VoteSubject::Kick { target, .. }) if *target == player_id
        );
        if target_left {
            self.votes.cancel();
            self.timers.disarm(TimerName::VoteWindow);
            out.push(Command::broadcast(format!(
                "Vote cancelled: {} left",
                player.name
            )));
        } else if let Some(progress) = self.votes.remove_voter(player_id) {
            if progress.is_complete() {
                self.finish_vote(out);
            }
        }

        self.check_population(out);
    }

    fn on_death(&mut self, victim_id: PlayerId, killer_id: Option<PlayerId>) {
        if !self.config.ranking {
            return;
        }
        let Some(victim) = self.players.get(&victim_id) else {
            warn!(player_id = victim_id, error = ?ControlError::UnknownPlayer(victim_id), "death of unknown player");
            return;
        };
        let victim_key = self.rank_key(victim);
        let killer_key = killer_id
            .and_then(|id| self.players.get(&id))
            .map(|killer| self.rank_key(killer));
        self.ranking.record_death(&victim_key, killer_key.as_deref());
    }

    fn on_chat(&mut self, sender_id: PlayerId, text: &str, out: &mut Vec<Command>) {
        let Some(sender) = self.players.get(&sender_id) else {
            warn!(player_id = sender_id, error = ?ControlError::UnknownPlayer(sender_id), "chat from unknown player");
            return;
        };
        let result = match self.parser.parse(text, sender.admin) {
            Ok(ChatLine::Chat(_)) => Ok(()),
            Ok(ChatLine::Admin(command)) => self.on_admin(sender_id, command, out),
            Ok(ChatLine::User(command)) => self.on_user(sender_id, command, out),
            Err(ControlError::AdminAuthFailed) => {
                warn!(player_id = sender_id, error = ?ControlError::AdminAuthFailed, "malformed admin command without authentication");
                Err(ControlError::AdminAuthFailed)
            }
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            info!(player_id = sender_id, ?error, "chat command rejected");
            out.push(Command::whisper(sender_id, error.to_string()));
        }
    }

    fn on_admin(
        &mut self,
        sender_id: PlayerId,
        command: AdminCommand,
        out: &mut Vec<Command>,
    ) -> Result<(), ControlError> {
        if let AdminCommand::Login { password } = &command {
            self.login(sender_id, password, out);
            return Ok(());
        }

        let is_admin = self
            .players
            .get(&sender_id)
            .is_some_and(|player| player.admin);
        if !is_admin {
            warn!(player_id = sender_id, error = ?ControlError::AdminAuthFailed, ?command, "admin command without authentication");
            return Err(ControlError::AdminAuthFailed);
        }
        info!(player_id = sender_id, ?command, "admin command");

        match command {
            AdminCommand::Login { .. } => {}
            AdminCommand::Logout => {
                if let Some(player) = self.players.get_mut(&sender_id) {
                    player.admin = false;
                }
                out.push(Command::whisper(sender_id, "Logged out"));
            }
            AdminCommand::Kick { target, reason } => {
                self.require_player(target)?;
                out.push(Command::Kick {
                    player_id: target,
                    reason: reason.unwrap_or_else(|| "Kicked by admin".to_string()),
                });
            }
            AdminCommand::Ban { target, minutes } => {
                self.require_player(target)?;
                out.push(Command::Ban {
                    player_id: target,
                    duration: minutes.map_or(BanDuration::Permanent, BanDuration::Minutes),
                });
            }
            AdminCommand::Map(level) => self.schedule_level(level, out),
            AdminCommand::Preset(preset) => self.schedule_preset(preset, out),
            AdminCommand::Set { option, value } => {
                out.push(Command::SetOption {
                    name: option,
                    value,
                });
            }
            AdminCommand::Start => {
                if self.phase != RoundPhase::Lobby {
                    return Err(ControlError::IllegalTransition);
                }
                self.start_weapon_selection(out);
            }
            AdminCommand::NextRound => {
                if self.phase != RoundPhase::InRound {
                    return Err(ControlError::IllegalTransition);
                }
                out.push(Command::EndRound);
                self.enter_post_round(out);
            }
            AdminCommand::SetTeam { target, team } => self.assign_team(target, team, out)?,
            AdminCommand::Say(text) => out.push(Command::broadcast(text)),
            AdminCommand::CancelVote => {
                self.votes.cancel().ok_or(ControlError::NoActiveVote)?;
                self.timers.disarm(TimerName::VoteWindow);
                out.push(Command::broadcast("Vote cancelled by admin"));
            }
        }
        Ok(())
    }

    // Failed attempts are logged only; the sender gets no reply.
    fn login(&mut self, sender_id: PlayerId, password: &str, out: &mut Vec<Command>) {
        let accepted = !self.config.admin_password.is_empty() && password == self.config.admin_password;
        if !accepted {
            warn!(player_id = sender_id, error = ?ControlError::AdminAuthFailed, "admin login failed");
            return;
        }
        if let Some(player) = self.players.get_mut(&sender_id) {
            player.admin = true;
            info!(player_id = sender_id, name = %player.name, "admin authenticated");
            out.push(Command::whisper(sender_id, "You are now admin"));
        }
    }

    fn require_player(&self, id: PlayerId) -> Result<&Player, ControlError> {
        self.players.get(&id).ok_or(ControlError::UnknownPlayer(id))
    }

    fn assign_team(
        &mut self,
        target: PlayerId,
        team: u8,
        out: &mut Vec<Command>,
    ) -> Result<(), ControlError> {
        if team >= self.config.team_count() {
            let label = team_letter(team).map_or_else(|| team.to_string(), String::from);
            return Err(ControlError::TeamUnavailable(label));
        }
        let player = self
            .players
            .get_mut(&target)
            .ok_or(ControlError::UnknownPlayer(target))?;
        player.team = Some(team);
        out.push(Command::SetTeam {
            player_id: target,
            team,
        });
        Ok(())
    }

    fn on_user(
        &mut self,
        sender_id: PlayerId,
        command: UserCommand,
        out: &mut Vec<Command>,
    ) -> Result<(), ControlError> {
        match command {
            UserCommand::Team(team) => {
                if !self.config.allow_team_change {
                    return Err(ControlError::TeamChangeDisabled);
                }
                self.assign_team(sender_id, team, out)
            }
            UserCommand::Vote(request) => self.start_vote(sender_id, request, out),
            UserCommand::Yes => self.cast_vote(sender_id, VoteChoice::Yes, out),
            UserCommand::No => self.cast_vote(sender_id, VoteChoice::No, out),
            UserCommand::Rank(name) => {
                if !self.config.ranking {
                    return Err(ControlError::RankingDisabled);
                }
                let key = match name {
                    Some(name) => name,
                    None => self.rank_key(self.require_player(sender_id)?),
                };
                let text = match self.ranking.lookup(&key) {
                    Some(entry) => format!(
                        "#{} {}: {} kills, {} deaths, {} suicides",
                        entry.position,
                        entry.key,
                        entry.stats.kills,
                        entry.stats.deaths,
                        entry.stats.suicides
                    ),
                    None => format!("{key} is not ranked yet"),
                };
                out.push(Command::whisper(sender_id, text));
                Ok(())
            }
            UserCommand::TopRank => {
                if !self.config.ranking {
                    return Err(ControlError::RankingDisabled);
                }
                let lines: Vec<String> = self
                    .ranking
                    .top(TOP_RANK_COUNT)
                    .into_iter()
                    .map(|entry| format!("#{} {} ({} kills)", entry.position, entry.key, entry.stats.kills))
                    .collect();
                let text = if lines.is_empty() {
                    "Nobody is ranked yet".to_string()
                } else {
                    lines.join(", ")
                };
                out.push(Command::whisper(sender_id, text));
                Ok(())
            }
            UserCommand::Help => {
                out.push(Command::whisper(sender_id, USER_HELP));
                Ok(())
            }
        }
    }

    fn start_vote(
        &mut self,
        sender_id: PlayerId,
        request: VoteRequest,
        out: &mut Vec<Command>,
    ) -> Result<(), ControlError> {
        if !self.config.voting {
            return Err(ControlError::VotingDisabled);
        }
        let subject = match request {
            VoteRequest::Kick(target) => VoteSubject::Kick {
                target,
                name: self.require_player(target)?.name.clone(),
            },
            VoteRequest::Map(level) => VoteSubject::Level(
                find_entry(&self.config.levels, &level)
                    .ok_or_else(|| ControlError::InvalidCommand(format!("unknown map {level}")))?,
            ),
            VoteRequest::Preset(preset) => VoteSubject::Preset(
                find_entry(&self.config.presets, &preset)
                    .ok_or_else(|| ControlError::InvalidCommand(format!("unknown preset {preset}")))?,
            ),
            VoteRequest::LoadingTime(value) => VoteSubject::Rule {
                option: LOADING_TIME_OPTION.to_string(),
                value: OptionValue::Int(value),
            },
        };

        let voters: Vec<PlayerId> = self.players.keys().copied().collect();
        let progress = self
            .votes
            .open(subject.clone(), sender_id, voters)?;
        self.timers
            .arm(TimerName::VoteWindow, self.config.vote_window());

        let initiator = self.require_player(sender_id)?.name.clone();
        info!(player_id = sender_id, subject = %subject, "vote opened");
        let prefix = self.config.user_prefix();
        out.push(Command::broadcast(format!(
            "{initiator} started a vote: {subject}. Type {prefix}yes or {prefix}no"
        )));

        if progress.is_complete() {
            self.finish_vote(out);
        }
        Ok(())
    }

    fn cast_vote(
        &mut self,
        sender_id: PlayerId,
        choice: VoteChoice,
        out: &mut Vec<Command>,
    ) -> Result<(), ControlError> {
        let progress = self.votes.cast(sender_id, choice)?;
        debug!(player_id = sender_id, ?choice, yes = progress.yes, no = progress.no, "ballot cast");
        if progress.is_complete() {
            self.finish_vote(out);
        }
        Ok(())
    }

    fn finish_vote(&mut self, out: &mut Vec<Command>) {
        self.timers.disarm(TimerName::VoteWindow);
        match self.votes.resolve() {
            Ok(outcome) => self.apply_vote(outcome, out),
            Err(error) => debug!(?error, "vote window closed without a vote"),
        }
    }

    fn apply_vote(&mut self, outcome: VoteOutcome, out: &mut Vec<Command>) {
        let VoteOutcome {
            subject,
            passed,
            yes,
            no,
            ..
        } = outcome;
        info!(subject = %subject, passed, yes, no, "vote finished");

        let verdict = if passed { "passed" } else { "failed" };
        out.push(Command::broadcast(format!(
            "Vote {verdict}: {subject} (yes {yes}, no {no})"
        )));
        if !passed {
            return;
        }

        match subject {
            VoteSubject::Kick { target, name } => {
                info!(player_id = target, name = %name, "player kicked by vote");
                out.push(Command::Kick {
                    player_id: target,
                    reason: format!(
                        "Kicked by vote for {} minute(s)",
                        self.config.voting_kick_time
                    ),
                });
                self.votes
                    .record_kick_cooldown(target, name, self.config.vote_kick_cooldown());
            }
            VoteSubject::Level(level) => self.schedule_level(level, out),
            VoteSubject::Preset(preset) => self.schedule_preset(preset, out),
            VoteSubject::Rule { option, value } => out.push(Command::SetOption {
                name: option,
                value,
            }),
        }
    }

    fn check_pings(&mut self, out: &mut Vec<Command>) {
        let Some(limit) = self.config.ping_limit() else {
            return;
        };
        for player in self.players.values() {
            if player.ping_ms <= limit {
                self.ping_flagged.remove(&player.id);
                continue;
            }
            // First strike flags; still above on the next check kicks.
            if self.ping_flagged.insert(player.id) {
                debug!(player_id = player.id, ping_ms = player.ping_ms, "high ping flagged");
                continue;
            }
            self.ping_flagged.remove(&player.id);
            info!(player_id = player.id, ping_ms = player.ping_ms, limit, "kicking for high ping");
            out.push(Command::Kick {
                player_id: player.id,
                reason: format!("Ping too high ({} ms, max {limit} ms)", player.ping_ms),
            });
        }
    }
}

/// Uniform pick that avoids repeating `current` when an alternative exists.
fn pick_rotation<R: RandomSource>(
    rng: &mut R,
    options: &[String],
    current: Option<&str>,
) -> Option<String> {
    let fresh: Vec<&String> = options
        .iter()
        .filter(|option| Some(option.as_str()) != current)
        .collect();
    let pool = if fresh.is_empty() {
        options.iter().collect()
    } else {
        fresh
    };
    if pool.is_empty() {
        return None;
    }
    let index = rng.pick_index(pool.len()).min(pool.len() - 1);
    Some(pool[index].clone())
}

fn find_entry(options: &[String], wanted: &str) -> Option<String> {
    options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(wanted))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    // Always takes the first candidate.
    struct FirstPick;

    impl RandomSource for FirstPick {
        fn pick_index(&mut self, _len: usize) -> usize {
            0
        }
    }

    fn config() -> ServerConfig {
        ServerConfig {
            min_players_teams: 10,
            ..ServerConfig::default()
        }
    }

    fn controller(config: ServerConfig) -> Controller<FirstPick> {
        Controller::new(Arc::new(config), FirstPick)
    }

    fn join(control: &mut Controller<FirstPick>, id: PlayerId, name: &str) -> Vec<Command> {
        control.handle_signal(
            Signal::PlayerJoin {
                player_id: id,
                name: name.to_string(),
                rank_identity: None,
            },
            Duration::ZERO,
        )
    }

    fn chat(control: &mut Controller<FirstPick>, id: PlayerId, text: &str) -> Vec<Command> {
        control.handle_signal(
            Signal::Chat {
                sender_id: id,
                text: text.to_string(),
            },
            Duration::ZERO,
        )
    }

    fn tick(control: &mut Controller<FirstPick>, elapsed: Duration) -> Vec<Command> {
        control.handle_signal(Signal::Tick, elapsed)
    }

    // Two players, countdown elapsed, weapons picked.
    fn in_round(config: ServerConfig) -> Controller<FirstPick> {
        let mut control = controller(config);
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        tick(&mut control, 15 * SEC);
        control.handle_signal(Signal::WeaponsReady, Duration::ZERO);
        assert_eq!(control.phase(), RoundPhase::InRound);
        control
    }

    fn broadcasts(commands: &[Command]) -> Vec<&str> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::Broadcast { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn kicks(commands: &[Command]) -> Vec<PlayerId> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::Kick { player_id, .. } => Some(*player_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn when_first_signal_arrives_then_global_settings_and_rotation_are_loaded() {
        let mut cfg = config();
        cfg.global_settings
            .insert("GameOptions.GameInfo.AllowNickChange".to_string(), OptionValue::Int(1));
        cfg.presets = vec!["Mortars".to_string(), "Classic".to_string()];
        cfg.levels = vec!["JailBreak.lxl".to_string()];
        let mut control = controller(cfg);

        let out = tick(&mut control, Duration::ZERO);

        assert_eq!(
            out,
            vec![
                Command::set_option("GameOptions.GameInfo.AllowNickChange", OptionValue::Int(1)),
                Command::LoadPreset {
                    name: "Mortars".to_string()
                },
                Command::LoadLevel {
                    name: "JailBreak.lxl".to_string()
                },
            ]
        );
        assert_eq!(control.current_preset(), Some("Mortars"));
        assert!(control.timers().is_armed(TimerName::PresetRotation));
        assert!(tick(&mut control, Duration::ZERO).is_empty());
    }

    #[test]
    fn when_lone_player_waits_then_reminder_is_broadcast_once_per_period() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");

        let mut reminders = 0;
        for _ in 0..30 {
            let out = tick(&mut control, SEC);
            reminders += broadcasts(&out).len();
        }

        assert_eq!(reminders, 1);
        assert_eq!(
            control.timers().remaining(TimerName::TooFewPlayers),
            Some(30 * SEC)
        );
        assert_eq!(control.phase(), RoundPhase::Lobby);
    }

    #[test]
    fn when_enough_players_join_then_countdown_starts_and_round_follows() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        let out = join(&mut control, 2, "Bob");

        assert_eq!(broadcasts(&out), vec!["Game will start in 15 seconds"]);
        assert!(control.timers().is_armed(TimerName::PreGame));
        assert!(!control.timers().is_armed(TimerName::TooFewPlayers));

        let out = tick(&mut control, 15 * SEC);
        assert_eq!(control.phase(), RoundPhase::WeaponSelection);
        assert_eq!(
            out,
            vec![
                Command::broadcast(GAME_STARTING_TEXT),
                Command::set_option(LIVES_OPTION, OptionValue::Int(-2)),
                Command::set_option(KILL_LIMIT_OPTION, OptionValue::Int(15)),
                Command::set_option(TIME_LIMIT_OPTION, OptionValue::Int(7)),
                Command::StartRound,
            ]
        );
    }

    #[test]
    fn when_player_leaves_during_countdown_then_countdown_stops() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");

        control.handle_signal(Signal::PlayerLeave { player_id: 2 }, Duration::ZERO);

        assert!(!control.timers().is_armed(TimerName::PreGame));
        assert!(control.timers().is_armed(TimerName::TooFewPlayers));
        tick(&mut control, 15 * SEC);
        assert_eq!(control.phase(), RoundPhase::Lobby);
    }

    #[test]
    fn when_round_cycles_then_phases_follow_the_lobby_loop() {
        let mut control = in_round(config());
        assert!(control.timers().is_armed(TimerName::RoundTime));

        let out = control.handle_signal(
            Signal::RoundEnd {
                reason: RoundEndReason::MaxKills,
            },
            Duration::ZERO,
        );
        assert_eq!(control.phase(), RoundPhase::PostRound);
        assert_eq!(broadcasts(&out), vec!["Round over!"]);
        assert!(!control.timers().is_armed(TimerName::RoundTime));

        let out = tick(&mut control, 10 * SEC);
        assert_eq!(control.phase(), RoundPhase::Lobby);
        assert_eq!(broadcasts(&out), vec!["Game will start in 15 seconds"]);
    }

    #[test]
    fn when_weapon_selection_times_out_then_round_starts_without_host_signal() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        tick(&mut control, 15 * SEC);

        tick(&mut control, 40 * SEC);

        assert_eq!(control.phase(), RoundPhase::InRound);
    }

    #[test]
    fn when_round_time_runs_out_then_round_is_ended() {
        let mut control = in_round(config());

        let out = tick(&mut control, 420 * SEC);

        assert!(out.contains(&Command::EndRound));
        assert_eq!(control.phase(), RoundPhase::PostRound);
    }

    #[test]
    fn when_kills_are_recorded_then_round_results_name_the_leader() {
        let mut control = in_round(config());
        control.handle_signal(
            Signal::PlayerDied {
                victim_id: 2,
                killer_id: Some(1),
            },
            Duration::ZERO,
        );

        let out = control.handle_signal(
            Signal::RoundEnd {
                reason: RoundEndReason::MaxKills,
            },
            Duration::ZERO,
        );

        assert_eq!(
            broadcasts(&out),
            vec!["Round over! Best player: Alice with 1 kill(s)"]
        );
        let out = chat(&mut control, 2, "!rank Alice");
        assert_eq!(
            out,
            vec![Command::whisper(
                2,
                "#1 Alice: 1 kills, 0 deaths, 0 suicides"
            )]
        );
    }

    #[test]
    fn when_kick_is_sent_without_login_then_it_is_rejected() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 7, "Bob");

        let out = chat(&mut control, 1, "!kick 7");

        assert_eq!(out, vec![Command::whisper(1, "Command rejected")]);
        assert!(control.player(7).is_some());
    }

    #[test]
    fn when_admin_logs_in_then_admin_commands_are_applied() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 7, "Bob");

        assert!(chat(&mut control, 1, "!login wrong").is_empty());
        assert_eq!(
            chat(&mut control, 1, "!secret"),
            vec![Command::whisper(1, "You are now admin")]
        );
        assert_eq!(
            chat(&mut control, 1, "!kick 7 camping"),
            vec![Command::Kick {
                player_id: 7,
                reason: "camping".to_string()
            }]
        );
        assert_eq!(
            chat(&mut control, 1, "!ban 7 30"),
            vec![Command::Ban {
                player_id: 7,
                duration: BanDuration::Minutes(30)
            }]
        );
        assert_eq!(
            chat(&mut control, 1, "!kick 99"),
            vec![Command::whisper(1, "No player with id 99")]
        );
    }

    #[test]
    fn when_admin_starts_round_then_countdown_is_skipped() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        chat(&mut control, 1, "!secret");

        let out = chat(&mut control, 1, "!start");

        assert!(out.contains(&Command::StartRound));
        assert_eq!(control.phase(), RoundPhase::WeaponSelection);
        assert_eq!(
            chat(&mut control, 1, "!start"),
            vec![Command::whisper(1, "Not possible right now")]
        );
    }

    #[test]
    fn when_admin_changes_map_mid_round_then_it_loads_on_next_lobby() {
        let mut control = in_round(config());
        chat(&mut control, 1, "!secret");

        let out = chat(&mut control, 1, "!map Lake Liero.lxl");
        assert_eq!(
            broadcasts(&out),
            vec!["Map Lake Liero.lxl will be loaded next round"]
        );
        assert_eq!(control.current_level(), None);

        let out = chat(&mut control, 1, "!nextround");
        assert!(out.contains(&Command::EndRound));
        let out = tick(&mut control, 10 * SEC);

        assert!(out.contains(&Command::LoadLevel {
            name: "Lake Liero.lxl".to_string()
        }));
        assert_eq!(control.current_level(), Some("Lake Liero.lxl"));
    }

    #[test]
    fn when_vote_kick_passes_then_target_is_kicked_and_cooling_down() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        join(&mut control, 3, "Mallory");

        let out = chat(&mut control, 1, "!vote kick 3");
        assert_eq!(
            broadcasts(&out),
            vec!["Alice started a vote: kick Mallory. Type !yes or !no"]
        );
        assert_eq!(
            chat(&mut control, 3, "!yes"),
            vec![Command::whisper(3, "You cannot vote on this")]
        );

        let out = chat(&mut control, 2, "!yes");
        assert_eq!(kicks(&out), vec![3]);
        assert!(control.active_vote().is_none());

        assert_eq!(
            chat(&mut control, 1, "!vote kick 3"),
            vec![Command::whisper(
                1,
                "That player was recently vote-kicked, try again in 5 minute(s)"
            )]
        );
    }

    #[test]
    fn when_vote_kicked_player_rejoins_then_they_are_kicked_again() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        join(&mut control, 3, "Mallory");
        chat(&mut control, 1, "!vote kick 3");
        chat(&mut control, 2, "!yes");
        control.handle_signal(Signal::PlayerLeave { player_id: 3 }, Duration::ZERO);

        let out = join(&mut control, 9, "mallory");

        assert_eq!(
            out,
            vec![Command::Kick {
                player_id: 9,
                reason: "You were kicked by vote, come back in 5 minute(s)".to_string()
            }]
        );
        assert!(control.player(9).is_none());

        tick(&mut control, 300 * SEC);
        assert!(kicks(&join(&mut control, 9, "Mallory")).is_empty());
    }

    #[test]
    fn when_vote_window_closes_with_silent_voters_then_vote_fails() {
        let mut control = controller(config());
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol"), (4, "Dave")] {
            join(&mut control, id, name);
        }
        chat(&mut control, 1, "!vote kick 4");
        assert_eq!(
            chat(&mut control, 1, "!yes"),
            vec![Command::whisper(1, "You already voted")]
        );

        let out = tick(&mut control, 15 * SEC);

        assert!(kicks(&out).is_empty());
        assert!(broadcasts(&out).contains(&"Vote failed: kick Dave (yes 1, no 0)"));
        assert!(control.active_vote().is_none());
    }

    #[test]
    fn when_second_vote_is_opened_then_it_is_refused() {
        let mut control = controller(config());
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol")] {
            join(&mut control, id, name);
        }
        chat(&mut control, 1, "!vote lt 3");

        assert_eq!(
            chat(&mut control, 2, "!vote kick 3"),
            vec![Command::whisper(2, "Another vote is already running")]
        );
    }

    #[test]
    fn when_vote_target_leaves_then_vote_is_cancelled() {
        let mut control = controller(config());
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol")] {
            join(&mut control, id, name);
        }
        chat(&mut control, 1, "!vote kick 3");

        let out = control.handle_signal(Signal::PlayerLeave { player_id: 3 }, Duration::ZERO);

        assert!(broadcasts(&out).contains(&"Vote cancelled: Carol left"));
        assert!(control.active_vote().is_none());
        assert!(!control.timers().is_armed(TimerName::VoteWindow));
    }

    #[test]
    fn when_voting_is_disabled_then_votes_are_refused() {
        let mut control = controller(ServerConfig {
            voting: false,
            ..config()
        });
        join(&mut control, 1, "Alice");

        assert_eq!(
            chat(&mut control, 1, "!vote lt 3"),
            vec![Command::whisper(1, "Voting is disabled on this server")]
        );
    }

    #[test]
    fn when_rule_vote_passes_then_option_is_set() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        chat(&mut control, 1, "!vote lt 3");

        let out = chat(&mut control, 2, "!y");

        assert!(out.contains(&Command::set_option(LOADING_TIME_OPTION, OptionValue::Int(3))));
    }

    #[test]
    fn when_population_crosses_team_threshold_then_team_mode_toggles() {
        let mut control = controller(ServerConfig {
            min_players_teams: 3,
            ..config()
        });
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");

        let out = join(&mut control, 3, "Carol");
        assert!(control.team_mode());
        assert!(out.contains(&Command::set_option(
            GAME_TYPE_OPTION,
            OptionValue::Int(TEAM_DEATHMATCH)
        )));
        assert!(out.contains(&Command::SetTeam {
            player_id: 2,
            team: 1
        }));
        assert_eq!(control.player(3).and_then(|player| player.team), Some(0));

        assert_eq!(
            chat(&mut control, 3, "!team r"),
            vec![Command::SetTeam {
                player_id: 3,
                team: 1
            }]
        );
        assert_eq!(
            chat(&mut control, 3, "!team y"),
            vec![Command::whisper(3, "Team y is not available")]
        );

        let out = control.handle_signal(Signal::PlayerLeave { player_id: 3 }, Duration::ZERO);
        assert!(!control.team_mode());
        assert!(out.contains(&Command::set_option(
            GAME_TYPE_OPTION,
            OptionValue::Int(DEATHMATCH)
        )));
        assert!(control.players().all(|player| player.team.is_none()));
    }

    #[test]
    fn when_team_change_is_disabled_then_team_command_is_refused() {
        let mut control = controller(ServerConfig {
            allow_team_change: false,
            ..config()
        });
        join(&mut control, 1, "Alice");

        assert_eq!(
            chat(&mut control, 1, "!team b"),
            vec![Command::whisper(1, "Team change is disabled on this server")]
        );
    }

    #[test]
    fn when_server_is_full_then_extra_player_is_kicked() {
        let mut control = controller(ServerConfig {
            max_players: 2,
            ..config()
        });
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");

        let out = join(&mut control, 3, "Carol");

        assert_eq!(
            out,
            vec![Command::Kick {
                player_id: 3,
                reason: "Server is full".to_string()
            }]
        );
        assert_eq!(control.players().count(), 2);
    }

    #[test]
    fn when_ping_stays_high_for_two_checks_then_player_is_kicked() {
        let mut control = in_round(config());
        control.handle_signal(
            Signal::PlayerPing {
                player_id: 2,
                ping_ms: 900,
            },
            Duration::ZERO,
        );

        assert!(kicks(&tick(&mut control, 10 * SEC)).is_empty());
        let out = tick(&mut control, 10 * SEC);

        assert_eq!(
            out,
            vec![Command::Kick {
                player_id: 2,
                reason: "Ping too high (900 ms, max 800 ms)".to_string()
            }]
        );
    }

    #[test]
    fn when_ping_recovers_between_checks_then_player_stays() {
        let mut control = in_round(config());
        control.handle_signal(
            Signal::PlayerPing {
                player_id: 2,
                ping_ms: 900,
            },
            Duration::ZERO,
        );
        tick(&mut control, 10 * SEC);
        control.handle_signal(
            Signal::PlayerPing {
                player_id: 2,
                ping_ms: 120,
            },
            Duration::ZERO,
        );

        assert!(kicks(&tick(&mut control, 10 * SEC)).is_empty());
    }

    #[test]
    fn when_rotation_is_due_then_next_lobby_picks_a_different_preset() {
        let mut control = in_round(ServerConfig {
            presets: vec!["Mortars".to_string(), "Classic".to_string()],
            ..config()
        });
        assert_eq!(control.current_preset(), Some("Mortars"));

        tick(&mut control, 300 * SEC);
        control.handle_signal(
            Signal::RoundEnd {
                reason: RoundEndReason::TimeLimit,
            },
            Duration::ZERO,
        );
        let out = tick(&mut control, 10 * SEC);

        assert!(out.contains(&Command::LoadPreset {
            name: "Classic".to_string()
        }));
        assert_eq!(control.current_preset(), Some("Classic"));
        assert!(control.timers().is_armed(TimerName::PresetRotation));
    }

    #[test]
    fn when_preset_has_overrides_then_they_are_sent_at_round_start() {
        let mut cfg = ServerConfig {
            presets: vec!["Mortars".to_string()],
            ..config()
        };
        cfg.preset_options.insert(
            "Mortars".to_string(),
            [(LIVES_OPTION.to_string(), OptionValue::Int(10))].into(),
        );
        let mut control = controller(cfg);
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        tick(&mut control, 15 * SEC);

        let out = control.handle_signal(Signal::WeaponsReady, Duration::ZERO);

        assert_eq!(out, vec![Command::set_option(LIVES_OPTION, OptionValue::Int(10))]);
    }

    #[test]
    fn when_shutdown_arrives_mid_round_then_round_ends_and_signals_are_ignored() {
        let mut control = in_round(config());

        let out = control.handle_signal(Signal::Shutdown, Duration::ZERO);

        assert_eq!(out, vec![Command::EndRound]);
        assert_eq!(control.phase(), RoundPhase::Quit);
        assert!(join(&mut control, 5, "Late").is_empty());
        assert!(tick(&mut control, 60 * SEC).is_empty());
    }

    #[test]
    fn when_chat_uses_unknown_keyword_then_sender_is_told() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");

        assert_eq!(
            chat(&mut control, 1, "!dance"),
            vec![Command::whisper(1, "Command not recognized: dance")]
        );
        assert!(chat(&mut control, 1, "hello all").is_empty());
        assert!(chat(&mut control, 42, "!help").is_empty());
    }

    #[test]
    fn when_rotation_expires_with_post_game_pause_then_lobby_rotates_in_that_tick() {
        let mut control = in_round(ServerConfig {
            presets: vec!["Mortars".to_string(), "Classic".to_string()],
            preset_timeout: 25,
            ..config()
        });
        control.handle_signal(
            Signal::RoundEnd {
                reason: RoundEndReason::TimeLimit,
            },
            Duration::ZERO,
        );

        let out = tick(&mut control, 10 * SEC);

        assert_eq!(control.phase(), RoundPhase::Lobby);
        assert!(out.contains(&Command::LoadPreset {
            name: "Classic".to_string()
        }));
        assert_eq!(control.current_preset(), Some("Classic"));
        assert_eq!(
            control.timers().remaining(TimerName::PresetRotation),
            Some(25 * SEC)
        );
    }

    #[test]
    fn when_lobby_idles_before_first_join_then_reminder_waits_a_full_period() {
        let mut control = controller(config());
        tick(&mut control, Duration::ZERO);
        tick(&mut control, 20 * SEC);
        assert!(!control.timers().is_armed(TimerName::TooFewPlayers));

        join(&mut control, 1, "Alice");
        assert_eq!(
            control.timers().remaining(TimerName::TooFewPlayers),
            Some(30 * SEC)
        );
        assert!(broadcasts(&tick(&mut control, 10 * SEC)).is_empty());

        let out = tick(&mut control, 20 * SEC);
        assert_eq!(
            broadcasts(&out),
            vec!["Game will start with minimum 2 players. Team Deathmatch if there's 10 or more players"]
        );

        control.handle_signal(Signal::PlayerLeave { player_id: 1 }, Duration::ZERO);
        assert!(!control.timers().is_armed(TimerName::TooFewPlayers));
    }

    #[test]
    fn when_round_ends_during_weapon_selection_then_each_edge_is_recorded() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");
        join(&mut control, 2, "Bob");
        tick(&mut control, 15 * SEC);
        assert_eq!(
            control.last_transitions(),
            &[(RoundPhase::Lobby, RoundPhase::WeaponSelection)]
        );

        control.handle_signal(
            Signal::RoundEnd {
                reason: RoundEndReason::Aborted,
            },
            Duration::ZERO,
        );

        assert_eq!(
            control.last_transitions(),
            &[
                (RoundPhase::WeaponSelection, RoundPhase::InRound),
                (RoundPhase::InRound, RoundPhase::PostRound),
            ]
        );
        chat(&mut control, 1, "hello");
        assert!(control.last_transitions().is_empty());
    }

    #[test]
    fn when_unauthenticated_sender_mistypes_admin_command_then_it_is_rejected() {
        let mut control = controller(config());
        join(&mut control, 1, "Alice");

        assert_eq!(
            chat(&mut control, 1, "!kick seven"),
            vec![Command::whisper(1, "Command rejected")]
        );

        chat(&mut control, 1, "!secret");
        assert_eq!(
            chat(&mut control, 1, "!kick seven"),
            vec![Command::whisper(
                1,
                "Command not recognized: usage: kick <id> [reason]"
            )]
        );
    }

    // Collects formatted log output written by a scoped subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("log buffer")).into_owned()
        }
    }

    #[test]
    fn when_kick_is_sent_without_login_then_auth_failure_is_logged_at_warn() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let out = tracing::subscriber::with_default(subscriber, || {
            let mut control = controller(config());
            join(&mut control, 1, "Alice");
            join(&mut control, 7, "Bob");
            chat(&mut control, 1, "!kick 7")
        });

        assert!(kicks(&out).is_empty());
        let logs = logs.contents();
        let line = logs
            .lines()
            .find(|line| line.contains("AdminAuthFailed"))
            .expect("auth failure logged");
        assert!(line.contains("WARN"));
    }
}
