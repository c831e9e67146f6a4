use std::io::{self, Write};

pub const DEFAULT_PROMPT: &str = "> ";

pub struct Prompt {
    text: Option<String>,
}

impl Prompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    /// A prompt that prints nothing.
    pub fn silent() -> Self {
        Self { text: None }
    }

    pub fn get_string(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Writes the prompt and flushes, since it has no line terminator.
    pub fn display<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.text.is_some() {
            out.write_all(self.get_string().as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }
}
