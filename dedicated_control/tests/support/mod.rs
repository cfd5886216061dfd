// Shared builders for driving the controller from integration tests.
// Not every test binary uses every helper.
#![allow(dead_code)]

use dedicated_control::domain::{Command, PlayerId, ServerConfig, Signal};
use dedicated_control::interface_adapters::utils::rng::EntropyRandom;
use dedicated_control::use_cases::Controller;
use std::{
    // The controller shares its config behind an `Arc`.
    sync::Arc,
    // Scripted signals carry no elapsed time.
    time::Duration,
};

// Config used by every integration test unless a test overrides fields.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        // Keep team mode reachable with a handful of players.
        min_players_teams: 4,
        // Small cap so random join streams hit the "server full" path.
        max_players: 6,
        // Two entries each so rotation always has an alternative.
        levels: vec!["JailBreak.lxl".to_string(), "Lake Liero.lxl".to_string()],
        presets: vec!["Mortars".to_string(), "Classic".to_string()],
        // Everything else keeps the documented defaults.
        ..ServerConfig::default()
    }
}

// Build a controller whose rotation picks repeat for the same seed.
pub fn controller(config: ServerConfig, seed: u64) -> Controller<EntropyRandom> {
    // Seeded source keeps whole runs reproducible between test invocations.
    Controller::new(Arc::new(config), EntropyRandom::seeded(seed))
}

// Join signal without a ranking identity.
pub fn join(player_id: PlayerId, name: &str) -> Signal {
    Signal::PlayerJoin {
        player_id,
        name: name.to_string(),
        rank_identity: None,
    }
}

// Chat line as the host would forward it.
pub fn chat(sender_id: PlayerId, text: &str) -> Signal {
    Signal::Chat {
        sender_id,
        text: text.to_string(),
    }
}

// Feed signals in order and collect every command emitted.
pub fn drive(
    controller: &mut Controller<EntropyRandom>,
    signals: impl IntoIterator<Item = Signal>,
) -> Vec<Command> {
    signals
        .into_iter()
        // Non-tick signals never advance time, so each is handled at zero elapsed.
        .flat_map(|signal| controller.handle_signal(signal, Duration::ZERO))
        .collect()
}
