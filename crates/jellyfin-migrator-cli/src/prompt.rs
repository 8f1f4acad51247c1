use jellyfin_migrator_core::{Acknowledge, Acknowledgement};
use std::io::{self, Write};
use std::path::Path;

pub fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(default.unwrap_or(false));
        }

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}

/// Asks on the terminal before a job modifies its own source file.
pub struct TerminalAck;

impl Acknowledge for TerminalAck {
    fn acknowledge(&self, path: &Path) -> Acknowledgement {
        let question = format!(
            "{} would be modified in place. Work on original files for the rest of this run?",
            path.display()
        );
        match prompt_confirm(&question, Some(false)) {
            Ok(true) => Acknowledgement::Proceed,
            _ => Acknowledgement::Skip,
        }
    }
}
