//! Incremental transcript rendering for line-oriented terminals
//!
//! Snapshots arrive after every change; the renderer prints only what is new
//! since the previous snapshot, so a streamed reply appears token by token.

use crate::session::{ConversationSnapshot, Message, MessageSource};

const RESTART_MARKER: &str = "--- conversation restarted ---\n";

#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    generation: u64,
    /// Number of transcript entries whose output has started
    printed: usize,
    /// Text already shown for the last entry while it is still growing
    open: Option<String>,
}

impl TranscriptRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `snapshot`, given everything rendered before it
    pub fn render(&mut self, snapshot: &ConversationSnapshot) -> String {
        let mut out = String::new();

        if snapshot.generation != self.generation {
            if self.open.take().is_some() {
                out.push('\n');
            }
            out.push_str(RESTART_MARKER);
            self.generation = snapshot.generation;
            self.printed = 0;
        }

        if let Some(shown) = self.open.take() {
            let index = self.printed - 1;
            match snapshot.messages.get(index) {
                Some(message) => {
                    if let Some(rest) = message.text.strip_prefix(shown.as_str()) {
                        out.push_str(rest);
                    } else {
                        // Replaced rather than extended (fallback or corrected final text)
                        out.push('\n');
                        out.push_str(label(message));
                        out.push_str(&message.text);
                    }
                    self.finish_entry(snapshot, index, &mut out);
                }
                None => {
                    out.push('\n');
                    self.printed = snapshot.messages.len();
                }
            }
        }

        for (index, message) in snapshot.messages.iter().enumerate().skip(self.printed) {
            out.push_str(label(message));
            out.push_str(&message.text);
            self.finish_entry(snapshot, index, &mut out);
        }
        self.printed = self.printed.max(snapshot.messages.len());

        out
    }

    /// Leave the entry open if a stream may still extend it, else end the line
    fn finish_entry(&mut self, snapshot: &ConversationSnapshot, index: usize, out: &mut String) {
        let message = &snapshot.messages[index];
        let growing = snapshot.is_loading
            && message.source == MessageSource::Bot
            && index + 1 == snapshot.messages.len();
        if growing {
            self.open = Some(message.text.clone());
        } else {
            out.push('\n');
        }
    }
}

fn label(message: &Message) -> &'static str {
    match message.source {
        MessageSource::User => "you> ",
        MessageSource::Bot => "bot> ",
    }
}
