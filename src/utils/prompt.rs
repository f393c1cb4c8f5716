// pst/src/utils/prompt.rs
//! Numbered menus read from stdin.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};

/// Prints `options` as a numbered list and reads choices until a valid one is entered.
pub fn select_option<R: BufRead, W: Write>(
    options: &[String],
    title: &str,
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> Result<String> {
    if options.is_empty() {
        anyhow::bail!("No {} to choose from", title.to_lowercase());
    }

    writeln!(output, "\n{}:", title)?;
    for (i, option) in options.iter().enumerate() {
        writeln!(output, "{}. {}", i + 1, option)?;
    }

    loop {
        write!(output, "{}", prompt)?;
        output.flush().context("Failed to flush stdout")?;

        let mut line = String::new();
        let read = input.read_line(&mut line).context("Failed to read user input")?;
        if read == 0 {
            anyhow::bail!("Input closed before a selection was made");
        }

        match line.trim().parse::<usize>() {
            Ok(choice) if (1..=options.len()).contains(&choice) => {
                return Ok(options[choice - 1].clone());
            }
            Ok(_) => writeln!(output, "Invalid selection. Please try again.")?,
            Err(_) => writeln!(output, "Invalid input. Please enter a number.")?,
        }
    }
}

/// `select_option` on the terminal.
pub fn prompt_selection(options: &[String], title: &str, prompt: &str) -> Result<String> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    select_option(options, title, prompt, &mut input, &mut output)
}
