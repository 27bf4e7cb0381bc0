//! Terminal front end: reads commands from stdin, prints the session log.

use std::collections::HashSet;

use anyhow::Context;
use tavern_domain::{ConnectionStatus, Message, MessageId, MessageMetadata, RollMode, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::error::CommandError;
use crate::application::services::SessionService;

const HELP: &str = "\
commands:
  <text>                    chat in character
  /ooc <text>               out-of-character chat
  /me <text>                describe an action
  /roll [adv|dis] <dice> [purpose]
  /init [modifier]          roll initiative
  /next                     advance the turn
  /history [limit]          request message history
  /state | /scene           request a fresh snapshot
  /who                      list players
  /quit";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Chat { text: String, is_ooc: bool },
    Action(String),
    Roll {
        notation: String,
        purpose: Option<String>,
        mode: RollMode,
    },
    Initiative(i32),
    NextTurn,
    History(Option<u32>),
    GameState,
    Scene,
    Who,
    Help,
    Quit,
    Empty,
}

/// Parse a line. `Err` carries a usage hint.
pub fn parse_input(line: &str) -> Result<InputCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(InputCommand::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(InputCommand::Chat {
            text: line.to_string(),
            is_ooc: false,
        });
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name.to_ascii_lowercase().as_str() {
        "ooc" => Ok(InputCommand::Chat {
            text: rest.to_string(),
            is_ooc: true,
        }),
        "me" => Ok(InputCommand::Action(rest.to_string())),
        "roll" | "r" => parse_roll(rest),
        "init" => match rest {
            "" => Ok(InputCommand::Initiative(0)),
            n => n
                .parse()
                .map(InputCommand::Initiative)
                .map_err(|_| "usage: /init [modifier]".to_string()),
        },
        "next" => Ok(InputCommand::NextTurn),
        "history" => match rest {
            "" => Ok(InputCommand::History(None)),
            n => n
                .parse()
                .map(|n| InputCommand::History(Some(n)))
                .map_err(|_| "usage: /history [limit]".to_string()),
        },
        "state" => Ok(InputCommand::GameState),
        "scene" => Ok(InputCommand::Scene),
        "who" => Ok(InputCommand::Who),
        "help" | "?" => Ok(InputCommand::Help),
        "quit" | "exit" => Ok(InputCommand::Quit),
        other => Err(format!("unknown command /{other}; try /help")),
    }
}

const OPERATORS: [char; 2] = ['+', '-'];

fn parse_roll(rest: &str) -> Result<InputCommand, String> {
    let mut words = rest.split_whitespace().peekable();
    let mode = match words.peek().map(|w| w.to_ascii_lowercase()) {
        Some(w) if w == "adv" => RollMode::Advantage,
        Some(w) if w == "dis" => RollMode::Disadvantage,
        _ => RollMode::Normal,
    };
    if mode != RollMode::Normal {
        words.next();
    }
    let mut notation = words
        .next()
        .ok_or_else(|| "usage: /roll [adv|dis] <dice> [purpose]".to_string())?
        .to_string();
    // Spaced operators stay part of the expression: `1d20 + 5`
    while let Some(next) = words.peek() {
        if !(notation.ends_with(OPERATORS) || next.starts_with(OPERATORS)) {
            break;
        }
        notation.push_str(next);
        words.next();
    }
    let purpose = words.collect::<Vec<_>>().join(" ");
    Ok(InputCommand::Roll {
        notation,
        purpose: (!purpose.is_empty()).then_some(purpose),
        mode,
    })
}

/// Run one command; returns a line to print, if any
fn execute(service: &SessionService, command: InputCommand) -> Result<Option<String>, CommandError> {
    let store = service.store();
    match command {
        InputCommand::Chat { text, is_ooc } => store.send_chat(&text, is_ooc).map(|_| None),
        InputCommand::Action(text) => store.send_action(&text).map(|_| None),
        InputCommand::Roll {
            notation,
            purpose,
            mode,
        } => {
            let parsed = store.send_dice_roll_with_mode(&notation, purpose.as_deref(), mode)?;
            Ok((!parsed.rejected.is_empty()).then(|| {
                let dropped: Vec<&str> = parsed.rejected.iter().map(|r| r.term.as_str()).collect();
                format!("ignored unsupported dice: {}", dropped.join(", "))
            }))
        }
        InputCommand::Initiative(modifier) => store
            .roll_initiative(modifier)
            .map(|result| Some(format!("initiative: {}", result.breakdown()))),
        InputCommand::NextTurn => store.advance_turn().map(|_| None),
        InputCommand::History(limit) => store.request_message_history(limit).map(|_| None),
        InputCommand::GameState => store.request_game_state().map(|_| None),
        InputCommand::Scene => store.request_scene_info().map(|_| None),
        InputCommand::Who => Ok(Some(roster_summary(&store.snapshot()))),
        InputCommand::Help => Ok(Some(HELP.to_string())),
        InputCommand::Quit | InputCommand::Empty => Ok(None),
    }
}

fn roster_summary(state: &SessionState) -> String {
    if state.roster().is_empty() {
        return "no players yet".to_string();
    }
    let header = format!(
        "{} of {} online",
        state.online_players().count(),
        state.roster().len()
    );
    let lines = state.roster().iter().map(|p| {
        let marker = if state.current_turn() == Some(p.user_id.as_str()) { ">" } else { " " };
        let presence = if p.is_online { "online" } else { "offline" };
        match (p.current_hp, p.max_hp) {
            (Some(hp), Some(max)) => format!("{marker} {} ({presence}) {hp}/{max} hp", p.label()),
            _ => format!("{marker} {} ({presence})", p.label()),
        }
    });
    std::iter::once(header).chain(lines).collect::<Vec<_>>().join("\n")
}

/// Format one confirmed log entry
pub fn render_message(message: &Message) -> String {
    let time = message.timestamp.format("%H:%M");
    match &message.metadata {
        MessageMetadata::Chat { is_ooc: true } => {
            format!("[{time}] (( {}: {} ))", message.author, message.content)
        }
        MessageMetadata::Chat { .. } => format!("[{time}] {}: {}", message.author, message.content),
        MessageMetadata::Action => format!("[{time}] * {} {}", message.author, message.content),
        MessageMetadata::System { is_error: true } => format!("[{time}] ! {}", message.content),
        MessageMetadata::System { .. } => format!("[{time}] -- {}", message.content),
        _ => format!("[{time}] {}: {}", message.author, message.content),
    }
}

/// Prints what changed since the last snapshot
#[derive(Default)]
struct Printer {
    status: Option<ConnectionStatus>,
    seen: HashSet<MessageId>,
}

impl Printer {
    fn render(&mut self, state: &SessionState) {
        let status = state.connection_status();
        if self.status != Some(status) {
            println!("-- {status}");
            self.status = Some(status);
        }
        let current: HashSet<MessageId> = state.messages().iter().map(|m| m.id).collect();
        for message in state.messages().iter().filter(|m| !m.provisional) {
            if !self.seen.contains(&message.id) {
                println!("{}", render_message(message));
            }
        }
        self.seen = current;
    }
}

/// Join `session_id` and run the input loop until `/quit`, EOF or Ctrl-C
pub async fn run(service: SessionService, session_id: &str) -> anyhow::Result<()> {
    let mut updates = service.store().subscribe();
    let mut printer = Printer::default();

    if let Err(e) = service.open(session_id).await {
        if !service.connection().state().is_busy() {
            return Err(e).context("could not join session");
        }
        tracing::warn!(error = %e, "Initial connect failed, retrying");
    }
    printer.render(&updates.borrow_and_update().clone());
    println!("type /help for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                match parse_input(&line) {
                    Ok(InputCommand::Quit) => break,
                    Ok(command) => match execute(&service, command) {
                        Ok(Some(output)) => println!("{output}"),
                        Ok(None) => {}
                        Err(e) => println!("! {e}"),
                    },
                    Err(usage) => println!("{usage}"),
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                printer.render(&state);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    service.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            parse_input("  hello all "),
            Ok(InputCommand::Chat {
                text: "hello all".into(),
                is_ooc: false
            })
        );
        assert_eq!(parse_input("   "), Ok(InputCommand::Empty));
    }

    #[test]
    fn slash_commands() {
        assert_eq!(
            parse_input("/ooc brb"),
            Ok(InputCommand::Chat {
                text: "brb".into(),
                is_ooc: true
            })
        );
        assert_eq!(parse_input("/me ducks"), Ok(InputCommand::Action("ducks".into())));
        assert_eq!(parse_input("/next"), Ok(InputCommand::NextTurn));
        assert_eq!(parse_input("/init -1"), Ok(InputCommand::Initiative(-1)));
        assert_eq!(parse_input("/init"), Ok(InputCommand::Initiative(0)));
        assert_eq!(parse_input("/history 20"), Ok(InputCommand::History(Some(20))));
        assert_eq!(parse_input("/QUIT"), Ok(InputCommand::Quit));
        assert!(parse_input("/init lots").is_err());
        assert!(parse_input("/dance").is_err());
    }

    #[test]
    fn roll_takes_mode_notation_and_purpose() {
        assert_eq!(
            parse_input("/roll adv 1d20+3 sneak attack"),
            Ok(InputCommand::Roll {
                notation: "1d20+3".into(),
                purpose: Some("sneak attack".into()),
                mode: RollMode::Advantage,
            })
        );
        assert_eq!(
            parse_input("/r 2d6"),
            Ok(InputCommand::Roll {
                notation: "2d6".into(),
                purpose: None,
                mode: RollMode::Normal,
            })
        );
        assert!(parse_input("/roll dis").is_err());
    }

    #[test]
    fn roll_joins_spaced_operators() {
        assert_eq!(
            parse_input("/roll 1d20 + 5 stealth"),
            Ok(InputCommand::Roll {
                notation: "1d20+5".into(),
                purpose: Some("stealth".into()),
                mode: RollMode::Normal,
            })
        );
        assert_eq!(
            parse_input("/roll dis 2d6 -1 +1d4 fire damage"),
            Ok(InputCommand::Roll {
                notation: "2d6-1+1d4".into(),
                purpose: Some("fire damage".into()),
                mode: RollMode::Disadvantage,
            })
        );
        assert_eq!(
            parse_input("/roll 1d8+ 2"),
            Ok(InputCommand::Roll {
                notation: "1d8+2".into(),
                purpose: None,
                mode: RollMode::Normal,
            })
        );
    }

    #[test]
    fn who_lists_roster_with_online_count() {
        let mut state = SessionState::default();
        assert_eq!(roster_summary(&state), "no players yet");

        let mut bob = tavern_domain::Player::new("u2", "bob");
        bob.is_online = false;
        state.replace_roster(vec![tavern_domain::Player::new("u1", "ann"), bob]);
        state.set_turn(Some("u1".into()), Some(1));

        assert_eq!(
            roster_summary(&state),
            "1 of 2 online\n> ann (online)\n  bob (offline)"
        );
    }

    #[test]
    fn renders_by_kind() {
        let ooc = Message::new("ann", "lol", MessageMetadata::Chat { is_ooc: true });
        assert!(render_message(&ooc).ends_with("(( ann: lol ))"));

        let action = Message::new("ann", "ducks", MessageMetadata::Action);
        assert!(render_message(&action).ends_with("* ann ducks"));

        let error = Message::system("boom", true);
        assert!(render_message(&error).ends_with("! boom"));
    }
}
