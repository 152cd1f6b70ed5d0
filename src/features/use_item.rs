//! Lets viewers make the player use a carried chem/consumable by name.
//!
//! Grounded on `pipirc.features.use_chem.UseChem`/`use_favorite.py`:
//! acquire the inventory lock, look the item up by name, use it, and post
//! one of a handful of flavor lines naming the player and item.

use rand::seq::SliceRandom;

use crate::error::UserError;
use crate::features::{Command, Feature};

const FLAVOR_LINES: &[&str] = &[
    "Mainlined some {item}",
    "Huffed some {item}",
    "Slammed some {item}",
    "{player} can quit {item} whenever they want.",
    "{item} is {player}'s only friend.",
    "{player} goes on a wicked {item} trip",
    "{item}! What could go wrong?",
    "{player} replaced some of their blood with {item}",
    "Maybe they're born with it. Maybe it's {item}.",
    "If {item} is wrong, {player} doesn't want to be right.",
    "{player} gets their sweet fix of {item}",
];

pub struct UseItem {
    commands: Vec<Command>,
}

impl UseItem {
    pub const NAME: &'static str = "use_item";

    pub fn new() -> UseItem {
        UseItem {
            commands: vec![Command::new("useitem", |bot, _sender, _rank, args| {
                if args.is_empty() {
                    return Err(UserError("Wrong number of args for command.".to_string()));
                }
                let item_name = args.join(" ");

                bot.use_item(&item_name)?;

                let player = bot.pip().player_name();
                let mut rng = rand::thread_rng();
                let line = FLAVOR_LINES
                    .choose(&mut rng)
                    .unwrap()
                    .replace("{player}", &player)
                    .replace("{item}", &item_name);
                bot.say(&line);
                Ok(())
            })
            .help("Use a carried item by name")],
        }
    }
}

impl Default for UseItem {
    fn default() -> Self {
        UseItem::new()
    }
}

impl Feature for UseItem {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn commands(&self) -> &[Command] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Bot;
    use crate::config::StreamConfig;
    use crate::pip_client::TestPipClient;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_bot(inventory: Vec<String>) -> (Bot, Arc<TestPipClient>) {
        let pip = Arc::new(TestPipClient::new("TestPlayer", inventory));
        let config = StreamConfig {
            irc_host: "wss://irc-ws.chat.twitch.tv:443".to_string(),
            irc_user: None,
            irc_oauth: None,
            pip_key: "x".repeat(32),
            command_prefix: "!".to_string(),
            debug: false,
            currency: "points".to_string(),
            features: {
                let mut map = HashMap::new();
                map.insert("use_item".to_string(), serde_json::json!({"enabled": true}));
                map
            },
        };
        (
            Bot::start_for_test(config, pip.clone() as Arc<dyn crate::pip_client::PipClient>),
            pip,
        )
    }

    #[test]
    fn using_a_carried_item_consumes_it() {
        let (bot, pip) = test_bot(vec!["Jet".to_string()]);
        let feature = UseItem::new();
        feature.commands()[0].try_dispatch(
            &bot,
            "!",
            "!useitem Jet",
            "viewer",
            crate::chat::SenderRank::Viewer,
        );
        assert_eq!(pip.used_items(), vec!["Jet".to_string()]);
    }

    #[test]
    fn using_an_uncarried_item_is_a_no_op() {
        let (bot, pip) = test_bot(vec![]);
        let feature = UseItem::new();
        feature.commands()[0].try_dispatch(
            &bot,
            "!",
            "!useitem Jet",
            "viewer",
            crate::chat::SenderRank::Viewer,
        );
        assert!(pip.used_items().is_empty());
    }
}
