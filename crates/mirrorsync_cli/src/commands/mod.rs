//! CLI command implementations.

pub mod inspect;
pub mod replay;

use mirrorsync_protocol::{ProtocolResult, SyncMessage};
use std::path::Path;

/// One line of a JSON-lines message file.
#[derive(Debug)]
pub struct MessageLine {
    /// 1-based line number.
    pub line: usize,
    /// Decoded message or the reason it could not be decoded.
    pub message: ProtocolResult<SyncMessage>,
}

/// Reads a JSON-lines message file, skipping blank lines and `#` comments.
pub fn read_messages(path: &Path) -> std::io::Result<Vec<MessageLine>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_messages(&text))
}

/// Parses JSON-lines text.
pub fn parse_messages(text: &str) -> Vec<MessageLine> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| MessageLine {
            line: index + 1,
            message: SyncMessage::from_json(line.trim()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_comment_lines() {
        let text = concat!(
            "# fixture\n",
            "\n",
            r#"{"entityId":"c-1","entityKind":"company","crudAction":"Created","snapshot":{"name":"Acme"},"emittedAt":1}"#,
            "\n",
            "not json\n",
        );
        let lines = parse_messages(text);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line, 3);
        assert!(lines[0].message.is_ok());
        assert_eq!(lines[1].line, 4);
        assert!(lines[1].message.is_err());
    }
}
