//! Lists every non-mod-only command across all of a bot's enabled
//! features.
//!
//! Grounded on `pipirc.features.help.Help`.

use crate::bot::Bot;
use crate::features::{Command, Feature};

pub struct Help {
    commands: Vec<Command>,
}

impl Help {
    pub const NAME: &'static str = "help";

    pub fn new() -> Help {
        Help {
            commands: vec![Command::new(Self::COMMAND_NAME, |bot, _sender, _rank, _args| {
                let mut lines: Vec<(u32, String)> = Vec::new();
                for feature in bot.features() {
                    for command in feature.commands() {
                        if command.mod_only || command.name == Self::COMMAND_NAME {
                            continue;
                        }
                        let points_prefix = if command.point_cost > 0 {
                            format!("({} {}) ", command.point_cost, bot.config().currency)
                        } else {
                            String::new()
                        };
                        let line = format!(
                            "{prefix}{name} {points}- {help}",
                            prefix = bot.config().command_prefix,
                            name = command.name,
                            points = points_prefix,
                            help = command.help.unwrap_or("No help available"),
                        );
                        lines.push((command.point_cost, line));
                    }
                }
                lines.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
                for (_, line) in lines {
                    bot.say(&line);
                }
                Ok(())
            })
            .help("Display a list of commands and what they do")],
        }
    }

    const COMMAND_NAME: &'static str = "piphelp";
}

impl Default for Help {
    fn default() -> Self {
        Help::new()
    }
}

impl Feature for Help {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn commands(&self) -> &[Command] {
        &self.commands
    }
}
