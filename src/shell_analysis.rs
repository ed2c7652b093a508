//! Static structure analysis of a shell command string. Feeds the command
//! classifier and the executor's composite/substitution gates.

#[derive(Debug, Clone)]
pub struct ShellCommandAnalysis {
    /// Simple segments split on `&&`, `||`, `|` and `;`.
    pub segments: Vec<String>,
    pub has_composites: bool,
    pub has_redirection: bool,
    pub has_substitution: bool,
}

pub fn analyze_shell_command(command: &str) -> ShellCommandAnalysis {
    let has_composites = command.contains("&&")
        || command.contains("||")
        || command.contains(';')
        || command.contains('|');
    let has_redirection = command.contains('>') || command.contains('<');
    let has_substitution = command.contains('`') || command.contains("$(");

    ShellCommandAnalysis {
        segments: split_segments(command),
        has_composites,
        has_redirection,
        has_substitution,
    }
}

fn split_segments(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '&' if chars.peek() == Some(&'&') => {
                chars.next();
                flush(&mut segments, &mut buffer);
            }
            '|' => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                flush(&mut segments, &mut buffer);
            }
            ';' => flush(&mut segments, &mut buffer),
            _ => buffer.push(ch),
        }
    }
    flush(&mut segments, &mut buffer);
    segments
}

fn flush(segments: &mut Vec<String>, buffer: &mut String) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    buffer.clear();
}
