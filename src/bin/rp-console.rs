use daily_luck::build_dispatcher;
use daily_luck::config::config;
use daily_luck::db::init_db;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Reads `<user_id> <message>` lines from stdin and prints the bot's replies.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let conf = config()?;
    let pool = init_db(&conf.db_path).await?;
    let dispatcher = build_dispatcher(pool, conf);

    println!("Type `<user_id> <message>`, e.g. `alice /rp`. Ctrl-D to quit.");

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some((user_id, message)) = line.trim().split_once(char::is_whitespace) else {
            if !line.trim().is_empty() {
                println!("(need both a user id and a message)");
            }
            continue;
        };

        match dispatcher.handle(user_id, message).await {
            Some(reply) => println!("{}", reply),
            None => println!("(no reply)"),
        }
    }

    Ok(())
}
