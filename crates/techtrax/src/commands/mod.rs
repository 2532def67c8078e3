//! Command dispatch: bridges CLI args -> session operations -> output formatting.

pub mod config_cmd;
pub mod emit;
pub mod queue;
pub mod session;
pub mod util;
pub mod watch;

use techtrax_core::SessionContext;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a session-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    ctx: &SessionContext,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Login(args) => session::login(ctx, resolved, args, global).await,
        Command::Logout => session::logout(ctx, global).await,
        Command::Whoami => session::whoami(ctx, global),
        Command::Watch(args) => watch::handle(ctx, args, global).await,
        Command::Queue(args) => queue::handle(ctx, args, global).await,
        Command::Emit(args) => emit::handle(ctx, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions do not need a session".into(),
        )),
    }
}
