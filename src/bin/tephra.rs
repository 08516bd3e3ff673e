//! Interactive shell over the engine's programmatic API.

use std::io::Write;

use tephra::Engine;

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> tephra::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let db = Engine::open("./data")?;

    println!("tephra shell");
    println!("commands: SET <key> <val> | GET <key> | DELETE <key> | FLUSH | LISTALL | PURGE | EXIT");

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        prompt("tephra> ");
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }

        let mut parts = line.trim_end().splitn(3, ' ');
        let command = parts.next().unwrap_or("").to_uppercase();

        match command.as_str() {
            "SET" => match (parts.next(), parts.next()) {
                (Some(key), Some(value)) => match db.put(key.as_bytes(), value.as_bytes()) {
                    Ok(()) => println!("OK"),
                    Err(err) => println!("error: {err}"),
                },
                _ => println!("usage: SET <key> <val>"),
            },

            "GET" => match parts.next() {
                Some(key) => match db.get(key.as_bytes()) {
                    Ok(Some(value)) => println!("\"{}\"", String::from_utf8_lossy(&value)),
                    Ok(None) => println!("(nil)"),
                    Err(err) => println!("error: {err}"),
                },
                None => println!("usage: GET <key>"),
            },

            "DELETE" => match parts.next() {
                Some(key) => match db.delete(key.as_bytes()) {
                    Ok(()) => println!("OK"),
                    Err(err) => println!("error: {err}"),
                },
                None => println!("usage: DELETE <key>"),
            },

            "FLUSH" => match db.flush() {
                Ok(()) => println!("OK"),
                Err(err) => println!("error: {err}"),
            },

            "LISTALL" => {
                if let Err(err) = list_all(&db) {
                    println!("error: {err}");
                }
            }

            "PURGE" => {
                prompt("This deletes ALL data. Are you sure? (y/n): ");
                let mut answer = String::new();
                stdin.read_line(&mut answer)?;
                if answer.trim().eq_ignore_ascii_case("y") {
                    match db.purge().await {
                        Ok(()) => println!("purged"),
                        Err(err) => println!("error: {err}"),
                    }
                } else {
                    println!("cancelled");
                }
            }

            "EXIT" => break,

            "" => {}

            _ => println!("unknown command"),
        }
    }

    db.close().await
}

fn list_all(db: &Engine) -> tephra::Result<()> {
    let active = db.memtable_contents()?;
    println!("[active memtable] ({} keys)", active.len());
    for (key, value) in active {
        print_entry(&key, &value);
    }

    if let Some(immutable) = db.immutable_contents()? {
        println!("[immutable memtable] ({} keys)", immutable.len());
        for (key, value) in immutable {
            print_entry(&key, &value);
        }
    }

    for (path, records) in db.table_contents()? {
        println!("[table {}] ({} keys)", path.display(), records.len());
        for (key, value) in records {
            print_entry(&key, &value);
        }
    }
    Ok(())
}

fn print_entry(key: &[u8], value: &[u8]) {
    if value.is_empty() {
        println!("  {}: (tombstone)", String::from_utf8_lossy(key));
    } else {
        println!(
            "  {}: \"{}\"",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }
}
