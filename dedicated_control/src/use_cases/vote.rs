// Chat vote bookkeeping: one open vote at a time plus the vote-kick cooldown table.

use crate::domain::{ControlError, OptionValue, PlayerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum VoteSubject {
    Kick { target: PlayerId, name: String },
    Level(String),
    Preset(String),
    Rule { option: String, value: OptionValue },
}

impl fmt::Display for VoteSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteSubject::Kick { name, .. } => write!(f, "kick {name}"),
            VoteSubject::Level(level) => write!(f, "map {level}"),
            VoteSubject::Preset(preset) => write!(f, "preset {preset}"),
            VoteSubject::Rule { option, value } => write!(f, "set {option} to {value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChoice {
    Yes,
    No,
}

/// Pass rule applied on resolution.
#[derive(Debug, Clone, Copy)]
pub struct VoteRules {
    /// Minimum yes percentage, inclusive.
    pub percent: u32,
    /// When set, eligible voters who did not vote count as "no".
    pub count_negative: bool,
}

#[derive(Debug, Clone)]
pub struct Vote {
    pub subject: VoteSubject,
    pub initiator: PlayerId,
    eligible: BTreeSet<PlayerId>,
    ballots: BTreeMap<PlayerId, VoteChoice>,
}

impl Vote {
    pub fn progress(&self) -> VoteProgress {
        let yes = self
            .ballots
            .values()
            .filter(|choice| **choice == VoteChoice::Yes)
            .count();
        VoteProgress {
            yes,
            no: self.ballots.len() - yes,
            eligible: self.eligible.len(),
        }
    }

    pub fn is_eligible(&self, voter: PlayerId) -> bool {
        self.eligible.contains(&voter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteProgress {
    pub yes: usize,
    pub no: usize,
    pub eligible: usize,
}

impl VoteProgress {
    /// Every eligible voter has cast a ballot.
    pub fn is_complete(&self) -> bool {
        self.yes + self.no >= self.eligible
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    pub subject: VoteSubject,
    pub initiator: PlayerId,
    pub passed: bool,
    pub yes: usize,
    pub no: usize,
    /// Denominator used for the percentage.
    pub counted: usize,
}

#[derive(Debug, Clone)]
struct Cooldown {
    name: String,
    expires_at: Duration,
}

#[derive(Debug)]
pub struct VoteEngine {
    rules: VoteRules,
    // Sum of all elapsed time seen by the engine.
    clock: Duration,
    active: Option<Vote>,
    cooldowns: HashMap<PlayerId, Cooldown>,
}

impl VoteEngine {
    pub fn new(rules: VoteRules) -> Self {
        Self {
            rules,
            clock: Duration::ZERO,
            active: None,
            cooldowns: HashMap::new(),
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.clock = self.clock.saturating_add(elapsed);
        let now = self.clock;
        self.cooldowns.retain(|_, cooldown| cooldown.expires_at > now);
    }

    pub fn active(&self) -> Option<&Vote> {
        self.active.as_ref()
    }

    /// Opens a vote and casts the initiator's yes when they are eligible.
    pub fn open(
        &mut self,
        subject: VoteSubject,
        initiator: PlayerId,
        voters: impl IntoIterator<Item = PlayerId>,
    ) -> Result<VoteProgress, ControlError> {
        if self.active.is_some() {
            return Err(ControlError::VoteAlreadyActive);
        }

        let mut eligible: BTreeSet<PlayerId> = voters.into_iter().collect();
        if let VoteSubject::Kick { target, .. } = &subject {
            if let Some(remaining) = self.cooldown_remaining(*target) {
                return Err(ControlError::VoteTargetCoolingDown { remaining });
            }
            // Nobody votes on their own kick.
            eligible.remove(target);
        }

        let mut ballots = BTreeMap::new();
        if eligible.contains(&initiator) {
            ballots.insert(initiator, VoteChoice::Yes);
        }

        let vote = Vote {
            subject,
            initiator,
            eligible,
            ballots,
        };
        let progress = vote.progress();
        self.active = Some(vote);
        Ok(progress)
    }

    /// Records a ballot. Changing an earlier choice is allowed; repeating
    /// the same choice is rejected.
    pub fn cast(
        &mut self,
        voter: PlayerId,
        choice: VoteChoice,
    ) -> Result<VoteProgress, ControlError> {
        let vote = self.active.as_mut().ok_or(ControlError::NoActiveVote)?;
        if !vote.is_eligible(voter) {
            return Err(ControlError::NotEligibleToVote);
        }
        if vote.ballots.insert(voter, choice) == Some(choice) {
            return Err(ControlError::AlreadyVoted);
        }
        Ok(vote.progress())
    }

    /// Drops a departed player from the open vote, if any.
    pub fn remove_voter(&mut self, voter: PlayerId) -> Option<VoteProgress> {
        let vote = self.active.as_mut()?;
        vote.eligible.remove(&voter);
        vote.ballots.remove(&voter);
        Some(vote.progress())
    }

    pub fn cancel(&mut self) -> Option<Vote> {
        self.active.take()
    }

    /// Closes the open vote and applies the pass rule.
    pub fn resolve(&mut self) -> Result<VoteOutcome, ControlError> {
        let vote = self.active.take().ok_or(ControlError::NoActiveVote)?;
        let progress = vote.progress();
        let counted = if self.rules.count_negative {
            progress.eligible.max(progress.yes + progress.no)
        } else {
            progress.yes + progress.no
        };
        // Integer form of yes / counted >= percent / 100.
        let passed =
            counted > 0 && progress.yes as u64 * 100 >= u64::from(self.rules.percent) * counted as u64;

        debug!(
            subject = %vote.subject,
            yes = progress.yes,
            no = progress.no,
            counted,
            passed,
            "vote resolved"
        );

        Ok(VoteOutcome {
            subject: vote.subject,
            initiator: vote.initiator,
            passed,
            yes: progress.yes,
            no: progress.no,
            counted,
        })
    }

    pub fn record_kick_cooldown(&mut self, target: PlayerId, name: String, duration: Duration) {
        self.cooldowns.insert(
            target,
            Cooldown {
                name,
                expires_at: self.clock.saturating_add(duration),
            },
        );
    }

    pub fn cooldown_remaining(&self, target: PlayerId) -> Option<Duration> {
        self.cooldowns
            .get(&target)
            .map(|cooldown| cooldown.expires_at.saturating_sub(self.clock))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Cooldown lookup by display name, for players rejoining under a new id.
    pub fn cooldown_remaining_for_name(&self, name: &str) -> Option<Duration> {
        self.cooldowns
            .values()
            .filter(|cooldown| cooldown.name.eq_ignore_ascii_case(name))
            .map(|cooldown| cooldown.expires_at.saturating_sub(self.clock))
            .find(|remaining| !remaining.is_zero())
    }
}
