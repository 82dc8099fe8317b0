pub mod client;
pub mod logging;
pub mod session;
pub mod trust;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    ColorChoice, Command,
};

pub const CMD_ENROLL: &str = "enroll";
pub const CMD_VERIFY: &str = "verify";
pub const CMD_STATUS: &str = "status";
pub const CMD_SETTINGS: &str = "settings";
pub const CMD_PIN_MANAGEMENT: &str = "pin-management";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("eid-login")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CMD_ENROLL)
                .about("Read the eID card and store the response as the reference for this account"),
        )
        .subcommand(
            Command::new(CMD_VERIFY)
                .about("Read the eID card and compare the response with the enrolled reference")
                .long_about(
                    "Read the eID card and compare the response with the enrolled reference.\n\nExit status: 0 authenticated, 1 denied, 2 eID client unavailable or not enrolled.",
                ),
        )
        .subcommand(Command::new(CMD_STATUS).about("Show which eID client is running"))
        .subcommand(Command::new(CMD_SETTINGS).about("Open the settings of the eID client"))
        .subcommand(
            Command::new(CMD_PIN_MANAGEMENT).about("Open the PIN management of the eID client"),
        );

    let command = client::with_args(command);
    let command = trust::with_args(command);
    let command = session::with_args(command);
    logging::with_args(command)
}
