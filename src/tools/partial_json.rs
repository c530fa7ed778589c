//! Best-effort reconstruction of streamed tool arguments.
//!
//! Argument JSON arrives in arbitrary fragments. Each accumulated prefix is
//! closed (open string terminated, dangling separators dropped, open
//! containers closed) and parsed; prefixes that still cannot be parsed yield
//! `None` and are skipped by the caller.

/// Parse a possibly-truncated JSON document.
pub fn parse_partial(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(&close(trimmed)?).ok()
}

fn close(raw: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut out = raw.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    loop {
        let tail = out.trim_end();
        if tail.ends_with(',') || tail.ends_with(':') {
            let cut = tail.len() - 1;
            out.truncate(cut);
        } else {
            break;
        }
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    Some(out)
}

/// Accumulates argument fragments for one call and reports new snapshots.
#[derive(Debug, Default, Clone)]
pub struct PartialArguments {
    raw: String,
    last: Option<serde_json::Value>,
}

impl PartialArguments {
    /// Append a fragment. Returns the reconstructed snapshot when it parses
    /// and differs from the previous one.
    pub fn push(&mut self, fragment: &str) -> Option<&serde_json::Value> {
        self.raw.push_str(fragment);
        let snapshot = parse_partial(&self.raw)?;
        if self.last.as_ref() == Some(&snapshot) {
            return None;
        }
        self.last = Some(snapshot);
        self.last.as_ref()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Latest snapshot that parsed.
    pub fn snapshot(&self) -> Option<&serde_json::Value> {
        self.last.as_ref()
    }
}
