//! One-shot push-channel commands.

use std::time::Duration;

use techtrax_core::SessionContext;

use crate::cli::{EmitArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn handle(
    ctx: &SessionContext,
    args: EmitArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let payload = util::parse_json(&args.payload, "payload")?;
    let channel = ctx.open_channel().await?;

    let result = async {
        channel.wait_connected(CONNECT_TIMEOUT).await?;
        if args.no_ack {
            channel.emit(&args.event, payload).await?;
            return Ok(None);
        }
        let ack = channel.emit_with_ack(&args.event, payload).await?;
        Ok::<_, CliError>(Some(ack))
    }
    .await;
    channel.close().await;

    let Some(ack) = result? else {
        output::print_output(&format!("Sent {}", args.event), global.quiet);
        return Ok(());
    };
    if !ack.success {
        return Err(CliError::Rejected {
            message: ack
                .error
                .unwrap_or_else(|| format!("{} was refused", args.event)),
        });
    }

    let out = output::render_single(
        &global.output,
        &ack,
        |a| {
            if a.extra.is_empty() {
                format!("{} acknowledged", args.event)
            } else {
                serde_json::to_string_pretty(&a.extra).unwrap_or_default()
            }
        },
        |a| a.success.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
