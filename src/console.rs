//! Line-oriented local transport
//!
//! Drives a bot from a terminal as a single local user. Every input line is
//! a message; a line starting with `!` is a button press carrying the rest
//! of the line as its data. Outbound messages are written as plain text with
//! their buttons listed underneath.

use crate::error::TransportError;
use crate::event::{Content, Event, MessageRef, User};
use crate::runtime::{Batch, Transport};
use async_trait::async_trait;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

const BUTTON_PREFIX: char = '!';

/// Forward lines from `reader` until it closes or the receiver is gone
pub fn read_lines<R: BufRead>(reader: R, lines: &mpsc::UnboundedSender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if lines.send(line).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read console input");
                return;
            }
        }
    }
    tracing::debug!("Console input closed");
}

/// Input lines not yet acknowledged by an offset
struct Inbox {
    lines: mpsc::UnboundedReceiver<String>,
    /// Sequence number of `pending[0]`
    first: i64,
    pending: Vec<String>,
}

pub struct ConsoleTransport<W> {
    user: User,
    inbox: Mutex<Inbox>,
    out: Mutex<W>,
    next_ref: AtomicU64,
}

impl ConsoleTransport<std::io::Stdout> {
    /// Transport over the process's stdin and stdout
    pub fn stdio(user: User) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        // A blocked stdin read must not hold up runtime shutdown
        std::thread::spawn(move || read_lines(std::io::stdin().lock(), &tx));
        Self::new(user, rx, std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleTransport<W> {
    pub fn new(user: User, lines: mpsc::UnboundedReceiver<String>, out: W) -> Self {
        Self {
            user,
            inbox: Mutex::new(Inbox {
                lines,
                first: 0,
                pending: Vec::new(),
            }),
            out: Mutex::new(out),
            next_ref: AtomicU64::new(0),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Consume the transport, returning the writer
    pub fn into_writer(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, header: &str, content: &Content) -> Result<(), TransportError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        render(&mut *out, header, content)
            .map_err(|e| TransportError::network(format!("console write failed: {e}")))
    }

    fn parse(&self, seq: i64, line: &str) -> Option<Event> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let id = u64::try_from(seq).unwrap_or_default();
        Some(match line.strip_prefix(BUTTON_PREFIX) {
            Some(data) => Event::button(self.user.clone(), format!("console-{id}"), data.trim()),
            None => Event::message(self.user.clone(), id, line),
        })
    }
}

fn render(out: &mut impl Write, header: &str, content: &Content) -> std::io::Result<()> {
    writeln!(out, "{header} {}", content.text)?;
    for row in &content.buttons {
        let labels: Vec<String> = row
            .iter()
            .map(|b| format!("[{}] {BUTTON_PREFIX}{}", b.label, b.data))
            .collect();
        writeln!(out, "    {}", labels.join("  "))?;
    }
    out.flush()
}

#[async_trait]
impl<W: Write + Send> Transport for ConsoleTransport<W> {
    async fn send(&self, user: &User, content: &Content) -> Result<MessageRef, TransportError> {
        let message = MessageRef(self.next_ref.fetch_add(1, Ordering::SeqCst) + 1);
        tracing::debug!(user = %user.id, message = message.0, "Console send");
        self.write(&format!("[#{}]", message.0), content)?;
        Ok(message)
    }

    async fn edit(
        &self,
        user: &User,
        message: MessageRef,
        content: &Content,
    ) -> Result<MessageRef, TransportError> {
        tracing::debug!(user = %user.id, message = message.0, "Console edit");
        self.write(&format!("[#{} edited]", message.0), content)?;
        Ok(message)
    }

    async fn answer_interaction(&self, interaction_id: &str) -> Result<(), TransportError> {
        tracing::debug!(interaction_id, "Console interaction answered");
        Ok(())
    }

    async fn fetch_new(&self, offset: i64) -> Result<Batch, TransportError> {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);

        // Lines below the offset were delivered and are forgotten
        let delivered = usize::try_from(offset - inbox.first)
            .unwrap_or_default()
            .min(inbox.pending.len());
        inbox.pending.drain(..delivered);
        inbox.first += i64::try_from(delivered).unwrap_or_default();

        while let Ok(line) = inbox.lines.try_recv() {
            inbox.pending.push(line);
        }

        let first = inbox.first;
        let mut next_offset = first;
        let mut events = Vec::new();
        for line in &inbox.pending {
            if let Some(event) = self.parse(next_offset, line) {
                events.push(event);
            }
            next_offset += 1;
        }
        Ok(Batch {
            events,
            next_offset: next_offset.max(offset),
        })
    }
}
