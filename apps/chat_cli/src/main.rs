use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{load_settings, BroadcastEventHandler, ChatClient, ClientEvent, SendOptions};
use shared::domain::TopicId;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "chat.toml")]
    config: PathBuf,
    /// Topic used for lines that do not name one with `@topic`.
    #[arg(long)]
    topic: Option<String>,
    /// Mark incoming messages as read as they are printed.
    #[arg(long)]
    read: bool,
    #[arg(long, default_value_t = 20)]
    history: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let settings = load_settings(&args.config);
    let mut handler = BroadcastEventHandler::new(256);
    if args.read {
        handler = handler.with_ack(client_core::MessageAck {
            has_read: true,
            ..Default::default()
        });
    }
    let handler = Arc::new(handler);
    let events = handler.subscribe();
    let client = ChatClient::from_config(settings, handler).await;

    tokio::spawn(print_events(events));
    client.connect().await;

    if let Err(err) = client.begin_sync_conversations(50).await {
        warn!("chat_cli: conversation sync failed: {err}");
    }
    if let Some(topic) = &args.topic {
        print_history(&client, &TopicId::from(topic.as_str()), args.history).await;
    }

    println!("type `@topic text` or plain text for --topic; /read, /history, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&client, args.topic.as_deref(), args.history, line.trim()).await {
                    break;
                }
            }
        }
    }

    client.teardown().await;
    Ok(())
}

/// Returns `false` when the session should end.
async fn handle_line(client: &ChatClient, default_topic: Option<&str>, history: u32, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if line == "/quit" {
        return false;
    }

    let (topic, rest) = match line.strip_prefix('@') {
        Some(addressed) => match addressed.split_once(' ') {
            Some((topic, text)) => (Some(topic), text.trim()),
            None => (Some(addressed), ""),
        },
        None => (default_topic, line),
    };
    let Some(topic) = topic else {
        println!("no topic: start the line with @topic or pass --topic");
        return true;
    };
    let topic_id = TopicId::from(topic);

    match rest {
        "" => {}
        "/read" => match client.do_read(&topic_id, 0).await {
            Ok(conversation) => println!("[{topic_id}] read up to {}", conversation.last_read_seq),
            Err(err) => println!("[{topic_id}] read failed: {err}"),
        },
        "/history" => print_history(client, &topic_id, history).await,
        text => match client.do_send_text(&topic_id, text, SendOptions::default()).await {
            Ok(log) => println!("[{topic_id}] sent #{} ({:?})", log.seq, log.status),
            Err(err) => println!("[{topic_id}] send failed: {err}"),
        },
    }
    true
}

async fn print_history(client: &ChatClient, topic_id: &TopicId, limit: u32) {
    match client.sync_chatlogs(topic_id, 0, limit).await {
        Ok(page) => {
            for log in page.items {
                println!("[{topic_id}] #{} {}: {}", log.seq, log.sender_id, log.content.text);
            }
        }
        Err(err) => println!("[{topic_id}] history unavailable: {err}"),
    }
}

async fn print_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("chat_cli: skipped {skipped} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            ClientEvent::Connected => println!("* connected"),
            ClientEvent::Connecting => println!("* connecting"),
            ClientEvent::NetBroken(reason) => println!("* connection lost: {reason}"),
            ClientEvent::AuthError(reason) => println!("* authentication failed: {reason}"),
            ClientEvent::KickoffByOtherClient(reason) => println!("* kicked out: {reason}"),
            ClientEvent::Typing { topic_id, sender_id } => println!("[{topic_id}] {sender_id} is typing"),
            ClientEvent::TopicMessage { topic, message } => println!(
                "[{}] #{} {}: {}",
                topic.id, message.seq, message.sender_id, message.content.text
            ),
            ClientEvent::ConversationUpdated(conversation) => println!(
                "* {} unread={} last=#{}",
                conversation.topic_id, conversation.unread, conversation.last_message_seq
            ),
            ClientEvent::ConversationRemoved(topic_id) => println!("* {topic_id} removed"),
            ClientEvent::SystemMessage(frame) => {
                println!("* system: {}", frame.message.unwrap_or_default())
            }
        }
    }
}
