use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use weave_kernel::{
    wire::{self, CommandRejected},
    SessionHandle,
};

/// Serves one session over a line transport: a JSON command per input line,
/// a JSON event or rejection per output line.
///
/// Returns once the input is closed and the session has drained every event.
pub async fn serve<R, W>(input: R, mut output: W, handle: SessionHandle) -> io::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Replay so the front-end also sees the events published before this point
    let mut events = handle.subscribe(true);
    let mut lines = input.lines();
    let mut session = Some(handle);

    loop {
        tokio::select! {
            line = lines.next_line(), if session.is_some() => {
                let Some(handle) = session.as_ref() else {
                    continue;
                };
                match line? {
                    Some(line) => {
                        if let Some(rejection) = submit_line(handle, &line).await {
                            write_line(&mut output, wire::encode_rejection(&rejection)).await?;
                        }
                    }
                    None => {
                        info!("input closed, draining session");
                        session = None;
                    }
                }
            }
            event = events.recv() => match event {
                Some(event) => write_line(&mut output, wire::encode_event(&event)).await?,
                None => break,
            },
        }
    }

    output.flush().await?;
    Ok(output)
}

async fn submit_line(handle: &SessionHandle, line: &str) -> Option<CommandRejected> {
    if line.trim().is_empty() {
        return None;
    }

    let command = match wire::decode_command(line) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "ignoring malformed command");
            return Some(CommandRejected {
                command_id: wire::command_id_of(line),
                message: e.to_string(),
            });
        }
    };

    let command_id = command.id().clone();
    match handle.submit(command).await {
        Ok(()) => None,
        Err(e) => {
            warn!(command_id = %command_id, error = %e, "command rejected");
            Some(CommandRejected {
                command_id: Some(command_id),
                message: e.to_string(),
            })
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(
    output: &mut W,
    encoded: Result<String, wire::WireError>,
) -> io::Result<()> {
    match encoded {
        Ok(line) => {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await
        }
        Err(e) => {
            warn!(error = %e, "message could not be encoded");
            Ok(())
        }
    }
}
