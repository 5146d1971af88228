use clap::Parser;
use encchat::{client::ChatClient, config::ClientConfig, error::ClientError, session::SessionEvent};
use log::error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{sleep_until, Instant},
};

const HELP: &str = "commands: /typing, /quit; anything else is sent as a message";

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::Presence(users) if users.is_empty() => println!("* nobody else is online"),
        SessionEvent::Presence(users) => println!("* online: {}", users.join(", ")),
        SessionEvent::Message(line) => {
            println!("[{}] {}: {}", line.timestamp, line.username, line.message)
        }
        SessionEvent::Typing(username) => println!("* {} is typing...", username),
        SessionEvent::Disconnected => println!("* disconnected"),
    }
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    pretty_env_logger::init();

    let config = ClientConfig::parse();
    let mut client = ChatClient::new(config.server.clone());
    if !client.connect(&config.username).await? {
        error!("a non-empty username is required");
        return Ok(());
    }
    println!("connected to {} as {}", config.server, client.session().username());
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Name shown in the last "is typing" line, until the indicator lapses.
    let mut typing: Option<String> = None;
    loop {
        let typing_deadline = client
            .session()
            .typing_expires_at()
            .map(Instant::from_std)
            .unwrap_or_else(Instant::now);

        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                match line.trim() {
                    "/quit" => break,
                    "/typing" => {
                        client.send_typing().await?;
                    }
                    _ => {
                        client.send_message(&line).await?;
                    }
                }
            }
            event = client.next_event() => {
                match event? {
                    Some(SessionEvent::Disconnected) => {
                        render(&SessionEvent::Disconnected);
                        return Ok(());
                    }
                    Some(SessionEvent::Typing(username)) => {
                        if typing.as_deref() != Some(username.as_str()) {
                            render(&SessionEvent::Typing(username.clone()));
                        }
                        typing = Some(username);
                    }
                    Some(event) => render(&event),
                    None => return Ok(()),
                }
            }
            _ = sleep_until(typing_deadline), if typing.is_some() => {
                if !client.session().is_typing(std::time::Instant::now()) {
                    if let Some(username) = typing.take() {
                        println!("* {} stopped typing", username);
                    }
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
