// Classifies chat lines into admin commands, user commands, or plain chat.

use crate::domain::entities::team_from_letter;
use crate::domain::{ControlError, OptionValue, PlayerId, ServerConfig};

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Login { password: String },
    Logout,
    Kick { target: PlayerId, reason: Option<String> },
    Ban { target: PlayerId, minutes: Option<u32> },
    Map(String),
    Preset(String),
    Set { option: String, value: OptionValue },
    Start,
    NextRound,
    SetTeam { target: PlayerId, team: u8 },
    Say(String),
    CancelVote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteRequest {
    Kick(PlayerId),
    Map(String),
    Preset(String),
    LoadingTime(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Team(u8),
    Vote(VoteRequest),
    Yes,
    No,
    Rank(Option<String>),
    TopRank,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatLine {
    Admin(AdminCommand),
    User(UserCommand),
    Chat(String),
}

pub const USER_HELP: &str =
    "Commands: team <b/r/g/y>, vote <kick id|map name|preset name|lt seconds>, yes, no, rank [name], toprank";

#[derive(Debug, Clone)]
pub struct CommandParser {
    admin_prefix: String,
    user_prefix: String,
    admin_password: String,
}

impl CommandParser {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            admin_prefix: config.admin_prefix.clone(),
            user_prefix: config.user_prefix().to_string(),
            admin_password: config.admin_password.clone(),
        }
    }

    /// Admin keywords win over user keywords when both prefixes match.
    /// A recognized prefix with an unknown keyword is an `InvalidCommand`.
    /// Usage errors for admin keywords other than login are only shown to
    /// `authenticated` senders; everyone else gets `AdminAuthFailed`.
    pub fn parse(&self, text: &str, authenticated: bool) -> Result<ChatLine, ControlError> {
        let line = text.trim();
        let admin_rest = strip_prefix_ignore_case(line, &self.admin_prefix);
        let user_rest = strip_prefix_ignore_case(line, &self.user_prefix);

        if let Some(rest) = admin_rest {
            // The bare password after the prefix is a login.
            if !self.admin_password.is_empty() && rest.trim() == self.admin_password {
                return Ok(ChatLine::Admin(AdminCommand::Login {
                    password: rest.trim().to_string(),
                }));
            }
            let (keyword, args) = split_keyword(rest);
            match parse_admin(&keyword, args) {
                Ok(Some(command)) => return Ok(ChatLine::Admin(command)),
                Ok(None) => {}
                Err(_) if !authenticated && !is_login_keyword(&keyword) => {
                    return Err(ControlError::AdminAuthFailed);
                }
                Err(error) => return Err(error),
            }
        }

        if let Some(rest) = user_rest {
            let (keyword, args) = split_keyword(rest);
            if let Some(command) = parse_user(&keyword, args)? {
                return Ok(ChatLine::User(command));
            }
        }

        match admin_rest.or(user_rest).map(split_keyword) {
            Some((keyword, _)) if !keyword.is_empty() => Err(ControlError::InvalidCommand(keyword)),
            _ => Ok(ChatLine::Chat(text.to_string())),
        }
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}

// Lower-cased keyword plus the untouched remainder.
fn split_keyword(rest: &str) -> (String, &str) {
    let rest = rest.trim_start();
    match rest.split_once(char::is_whitespace) {
        Some((keyword, args)) => (keyword.to_lowercase(), args.trim()),
        None => (rest.to_lowercase(), ""),
    }
}

fn is_login_keyword(keyword: &str) -> bool {
    matches!(keyword, "login" | "auth")
}

fn invalid(usage: &str) -> ControlError {
    ControlError::InvalidCommand(format!("usage: {usage}"))
}

fn parse_player_id(raw: Option<&str>, usage: &str) -> Result<PlayerId, ControlError> {
    raw.and_then(|id| id.parse().ok()).ok_or_else(|| invalid(usage))
}

fn non_empty(args: &str, usage: &str) -> Result<String, ControlError> {
    if args.is_empty() {
        return Err(invalid(usage));
    }
    Ok(args.to_string())
}

fn parse_team(raw: &str) -> Option<u8> {
    team_from_letter(raw).or_else(|| raw.parse().ok())
}

fn parse_admin(keyword: &str, args: &str) -> Result<Option<AdminCommand>, ControlError> {
    let mut words = args.split_whitespace();
    let command = match keyword {
        keyword if is_login_keyword(keyword) => AdminCommand::Login {
            password: non_empty(args, "login <password>")?,
        },
        "logout" => AdminCommand::Logout,
        "kick" => {
            let usage = "kick <id> [reason]";
            let target = parse_player_id(words.next(), usage)?;
            let reason = args
                .split_once(char::is_whitespace)
                .map(|(_, reason)| reason.trim().to_string())
                .filter(|reason| !reason.is_empty());
            AdminCommand::Kick { target, reason }
        }
        "ban" => {
            let usage = "ban <id> [minutes]";
            let target = parse_player_id(words.next(), usage)?;
            let minutes = match words.next() {
                Some(raw) => Some(raw.parse().map_err(|_| invalid(usage))?),
                None => None,
            };
            AdminCommand::Ban { target, minutes }
        }
        "map" => AdminCommand::Map(non_empty(args, "map <level>")?),
        "preset" => AdminCommand::Preset(non_empty(args, "preset <name>")?),
        "set" => {
            let usage = "set <option> <value>";
            let (option, value) = args.split_once(char::is_whitespace).ok_or_else(|| invalid(usage))?;
            AdminCommand::Set {
                option: option.to_string(),
                value: OptionValue::parse(value.trim()),
            }
        }
        "start" => AdminCommand::Start,
        "nextround" | "endround" => AdminCommand::NextRound,
        "setteam" => {
            let usage = "setteam <id> <team>";
            let target = parse_player_id(words.next(), usage)?;
            let team = words.next().and_then(parse_team).ok_or_else(|| invalid(usage))?;
            AdminCommand::SetTeam { target, team }
        }
        "say" => AdminCommand::Say(non_empty(args, "say <text>")?),
        "cancelvote" => AdminCommand::CancelVote,
        _ => return Ok(None),
    };
    Ok(Some(command))
}

fn parse_user(keyword: &str, args: &str) -> Result<Option<UserCommand>, ControlError> {
    let command = match keyword {
        "team" => {
            let usage = "team <b/r/g/y>";
            let team = team_from_letter(args).ok_or_else(|| invalid(usage))?;
            UserCommand::Team(team)
        }
        "vote" => UserCommand::Vote(parse_vote(args)?),
        "yes" | "y" => UserCommand::Yes,
        "no" | "n" => UserCommand::No,
        "rank" => UserCommand::Rank((!args.is_empty()).then(|| args.to_string())),
        "toprank" => UserCommand::TopRank,
        "help" => UserCommand::Help,
        _ => return Ok(None),
    };
    Ok(Some(command))
}

fn parse_vote(args: &str) -> Result<VoteRequest, ControlError> {
    let usage = "vote <kick id|map name|preset name|lt seconds>";
    let (kind, subject) = split_keyword(args);
    match kind.as_str() {
        "kick" => Ok(VoteRequest::Kick(parse_player_id(Some(subject), usage)?)),
        "map" => Ok(VoteRequest::Map(non_empty(subject, usage)?)),
        "preset" | "mod" => Ok(VoteRequest::Preset(non_empty(subject, usage)?)),
        "lt" => subject
            .parse()
            .map(VoteRequest::LoadingTime)
            .map_err(|_| invalid(usage)),
        _ => Err(invalid(usage)),
    }
}
