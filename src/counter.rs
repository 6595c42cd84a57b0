use futures::StreamExt;
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use ratatui::{TerminalOptions, Viewport};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::error;

const TICK: Duration = Duration::from_millis(120);
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// State of the rendering loop. Mutated only by [`render_loop`] in response
/// to its three message kinds: an event was counted, an animation tick
/// elapsed, or termination was requested.
#[derive(Default)]
struct CounterModel {
    received: u64,
    frame: usize,
    done: bool,
}

impl CounterModel {
    fn event_received(&mut self) {
        self.received += 1;
    }

    fn tick(&mut self) {
        self.frame = (self.frame + 1) % SPINNER_FRAMES.len();
    }

    fn quit(&mut self) {
        self.done = true;
    }

    fn line(&self) -> String {
        format!(
            " {} Events received: {}",
            SPINNER_FRAMES[self.frame], self.received
        )
    }
}

/// Live event counter rendered inline in the terminal.
///
/// Owned by the caller: spawn it, feed it through the counting channel, stop
/// it when the session ends. It never reads the merged event sequence itself;
/// the caller bridges events into count signals, so render throughput cannot
/// slow the receive path beyond the counting channel's bound.
pub struct CounterOverlay {
    counts: mpsc::Sender<()>,
    quit: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl CounterOverlay {
    /// Start the rendering loop. A failure inside the loop is logged; it
    /// never takes the receive session down with it.
    pub fn spawn() -> Self {
        let (counts, count_rx) = mpsc::channel(64);
        let (quit, quit_rx) = watch::channel(false);
        let (done_tx, done) = watch::channel(false);

        let task = tokio::spawn(async move {
            // Dropped when the loop ends, which is what `finished` waits on.
            let _completion = done_tx;
            if let Err(e) = run(count_rx, quit_rx).await {
                error!(error = %e, "counter overlay failed");
            }
        });

        Self {
            counts,
            quit,
            done,
            task: Some(task),
        }
    }

    /// Sender half of the counting channel: one `()` per received event.
    pub fn counts(&self) -> mpsc::Sender<()> {
        self.counts.clone()
    }

    /// Resolves when the rendering loop exits on its own, e.g. the operator
    /// pressed a key. Safe to poll repeatedly from a select loop.
    pub async fn finished(&mut self) {
        let _ = self.done.changed().await;
    }

    /// Request termination and wait for the loop to wind down.
    pub async fn stop(mut self) {
        let _ = self.quit.send(true);
        if let Some(task) = self.task.take() {
            task.await.ok();
        }
    }
}

async fn run(
    mut counts: mpsc::Receiver<()>,
    mut quit: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut terminal = ratatui::init_with_options(TerminalOptions {
        viewport: Viewport::Inline(1),
    });
    let result = render_loop(&mut terminal, &mut counts, &mut quit).await;
    ratatui::restore();
    // Drop the shell prompt below the final counter line.
    println!();
    result
}

async fn render_loop(
    terminal: &mut ratatui::DefaultTerminal,
    counts: &mut mpsc::Receiver<()>,
    quit: &mut watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut model = CounterModel::default();
    let mut keys = crossterm::event::EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    while !model.done {
        terminal.draw(|frame| {
            frame.render_widget(Paragraph::new(Line::from(model.line())), frame.area());
        })?;

        tokio::select! {
            _ = quit.changed() => model.quit(),
            _ = tick.tick() => model.tick(),
            count = counts.recv() => match count {
                Some(()) => model.event_received(),
                None => model.quit(),
            },
            key = keys.next() => {
                // Any key press ends the run, matching the receive loop's
                // interrupt handling while the terminal is in raw mode.
                if let Some(Ok(crossterm::event::Event::Key(key))) = key {
                    if key.kind == crossterm::event::KeyEventKind::Press {
                        model.quit();
                    }
                }
            }
        }
    }

    // Leave the final count on screen.
    terminal.draw(|frame| {
        frame.render_widget(Paragraph::new(Line::from(model.line())), frame.area());
    })?;
    Ok(())
}
