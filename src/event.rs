use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Application events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// One line typed at the prompt
  Line(String),
  /// Periodic tick for query polling
  Tick,
  /// Input closed (EOF)
  Closed,
}

/// Event handler that produces events from line input and a tick timer
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read lines from stdin, ticking at the given rate
  pub fn new(tick_rate: Duration) -> Self {
    Self::with_input(BufReader::new(tokio::io::stdin()), tick_rate)
  }

  pub fn with_input<R>(input: R, tick_rate: Duration) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn line reader
    let line_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if line_tx.send(Event::Line(line)).is_err() {
              break;
            }
          }
          Ok(None) | Err(_) => {
            let _ = line_tx.send(Event::Closed);
            break;
          }
        }
      }
    });

    // Spawn ticker
    let tick_tx = tx;
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
