use anyhow::Result;
use std::io::{self, BufRead, Write};

pub fn prompt_string(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    read_trimmed_line(&mut io::stdin().lock())
}

/// Ask a yes/no question; only `y` or `yes` count as consent.
pub fn confirm(question: &str) -> Result<bool> {
    let answer = prompt_string(&format!("{question} [y/N]: "))?;
    Ok(is_yes(&answer))
}

fn read_trimmed_line(input: &mut impl BufRead) -> Result<String> {
    let mut s = String::new();
    input.read_line(&mut s)?;
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    Ok(s)
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
