use crate::chat::Message;
use crate::entity::Sender;
use chrono::Local;

/// One terminal line for `msg`, stamped to the minute in local time.
pub fn render_line(msg: &Message) -> String {
    let stamp = msg.timestamp.with_timezone(&Local).format("%H:%M");
    match msg.sender {
        Sender::Loading => format!("[{stamp}] {} is {}", msg.sender.label(), msg.text.to_lowercase()),
        _ => format!("[{stamp}] {}: {}", msg.sender.label(), msg.text),
    }
}

/// Prints messages it has not printed before. Ids only grow, so the highest
/// printed id is enough to tell.
#[derive(Debug, Default)]
pub struct Renderer {
    last_rendered: u64,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines for every message newer than the last call.
    pub fn fresh_lines(&mut self, messages: &[Message]) -> Vec<String> {
        let lines = messages
            .iter()
            .filter(|msg| msg.id > self.last_rendered)
            .map(render_line)
            .collect();
        if let Some(max) = messages.iter().map(|msg| msg.id).max() {
            self.last_rendered = self.last_rendered.max(max);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_line_has_minute_stamp_and_label() {
        let msg = Message::user(2, "hello");
        let expected = format!(
            "[{}] You: hello",
            msg.timestamp.with_timezone(&Local).format("%H:%M")
        );
        assert_eq!(render_line(&msg), expected);
    }

    #[test]
    fn placeholder_renders_as_typing() {
        let line = render_line(&Message::loading(3));
        assert!(line.ends_with("Bot is typing..."), "got {line}");
    }

    #[test]
    fn renderer_only_emits_new_messages() {
        let mut renderer = Renderer::new();
        let mut messages = vec![Message::greeting()];
        assert_eq!(renderer.fresh_lines(&messages).len(), 1);

        messages.push(Message::user(2, "hello"));
        messages.push(Message::loading(3));
        let lines = renderer.fresh_lines(&messages);
        assert_eq!(lines.len(), 2);

        messages.pop();
        messages.push(Message::bot(4, "hi there"));
        let lines = renderer.fresh_lines(&messages);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("Bot: hi there"));
    }
}
