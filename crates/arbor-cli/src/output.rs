use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    if rows.is_empty() {
        println!("No results found.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(headers.iter().map(String::as_str));
    for row in rows {
        builder.push_record(row.iter().map(String::as_str));
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}

/// Informational lines go to stderr so stdout stays machine-readable.
pub fn print_note(msg: &str) {
    eprintln!("{} {}", "→".cyan(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
