use std::io::{BufRead, Write};

use colored::Colorize;

/// Asks the user to pick one of `options` by index.
pub fn shell_select<T: AsRef<str>>(question: &str, options: &[T]) -> anyhow::Result<usize> {
    let stdin = std::io::stdin();
    select_from(question, options, &mut stdin.lock())
}

fn select_from<T: AsRef<str>>(
    question: &str,
    options: &[T],
    input: &mut impl BufRead,
) -> anyhow::Result<usize> {
    println!("{}", question.yellow());
    for (i, option) in options.iter().enumerate() {
        println!("  {}: {}", i, option.as_ref());
    }

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            bail!("no selection made");
        }

        match line.trim().parse::<usize>() {
            Ok(n) if n < options.len() => return Ok(n),
            _ => println!("Invalid input"),
        }
    }
}
