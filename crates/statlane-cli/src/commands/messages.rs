use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use statlane_sync::MessageHandler;

use crate::runtime::Runtime;

/// Answer one JSON request per stdin line with one JSON line on stdout.
pub async fn serve(config: &Path) -> anyhow::Result<()> {
    let rt = Runtime::load(config)?;
    let handler = MessageHandler::new(rt.queue.clone(), rt.action_settings);
    info!("reading requests from stdin");

    answer_lines(handler, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    info!(pending = rt.queue.queue_length(), "stdin closed");
    Ok(())
}

/// Handle every input line on its own task. Answers are written one line
/// each, in the order they complete.
pub async fn answer_lines<R, W>(handler: MessageHandler, input: R, mut output: W) -> anyhow::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(answer) = rx.recv().await {
            output.write_all(answer.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(output)
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let handler = handler.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let answer = handler.handle_json(&line).await;
            let _ = tx.send(answer.to_string());
        });
    }
    // The writer finishes once every in-flight request has answered.
    drop(tx);
    Ok(writer.await??)
}
