use bcrypt::{hash, DEFAULT_COST};
use std::env;

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn main() {
    let mut args = env::args().skip(1);
    let password = args.next().unwrap_or_else(|| {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD> [EMAIL]");
        std::process::exit(1);
    });
    let email = args.next();

    match hash(&password, DEFAULT_COST) {
        Ok(hashed) => {
            println!("\nCost     : {}", DEFAULT_COST);
            println!("Hash     : {}\n", hashed);
            if let Some(email) = email {
                println!("-- Seed an admin agent:");
                println!(
                    "INSERT INTO agents (email, password_hash, role) VALUES ({}, {}, 'admin');",
                    sql_literal(&email.trim().to_lowercase()),
                    sql_literal(&hashed)
                );
            }
        }
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            std::process::exit(1);
        }
    }
}
